//! Title card, text card and thumbnail rendering.
//!
//! Layout is a pure function of the text; rasterization uses `fontdue` glyphs
//! blended onto an `image` canvas.

use std::path::Path;

use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{RenderError, RenderResult};
use crate::utils::wrap_text;

pub const TITLE_FONT_SIZE: f32 = 47.0;
pub const TITLE_WRAP: usize = 35;
pub const TITLE_PADDING: f32 = 5.0;
const TITLE_X: f32 = 120.0;
const CHANNEL_POS: (f32, f32) = (205.0, 825.0);
const CHANNEL_FONT_SIZE: f32 = 30.0;

const TEMPLATE_SIZE: (u32, u32) = (1920, 1080);
const CARD_WIDTH: u32 = 1000;
const CARD_PADDING: f32 = 40.0;
const CARD_FONT_SIZE: f32 = 44.0;

/// Where and how big the title lines are drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleLayout {
    pub lines: Vec<String>,
    pub font_size: f32,
    pub x: f32,
    /// Top of the first line.
    pub y: f32,
    pub line_advance: f32,
}

/// Lay the title out on a template of height `template_height`.
///
/// Up to two lines use the full size. Longer titles are re-wrapped 10
/// characters wider and shrunk by how many lines the first wrap produced:
/// 3 lines -> 40px, 4 -> 35px, 5 or more -> 30px. `text_height` gives the
/// rendered height of a line at a font size.
pub fn layout_title(
    text: &str,
    template_height: u32,
    text_height: impl Fn(f32) -> f32,
) -> TitleLayout {
    let mut lines = wrap_text(text, TITLE_WRAP);
    let mut font_size = TITLE_FONT_SIZE;
    let mut y_adjust = 30.0;

    if lines.len() >= 3 {
        let (size, adjust) = match lines.len() {
            3 => (40.0, 35.0),
            4 => (35.0, 40.0),
            _ => (30.0, 30.0),
        };
        lines = wrap_text(text, TITLE_WRAP + 10);
        font_size = size;
        y_adjust = adjust;
    }

    let line_advance = text_height(font_size) + TITLE_PADDING;
    let block = line_advance * lines.len() as f32;
    let y = template_height as f32 / 2.0 - block / 2.0 + y_adjust;

    TitleLayout {
        lines,
        font_size,
        x: TITLE_X,
        y,
        line_advance,
    }
}

/// Parse `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_hex_color(s: &str) -> RenderResult<Rgba<u8>> {
    let hex = s.trim().trim_start_matches('#');
    let byte = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|h| u8::from_str_radix(h, 16).ok())
            .ok_or_else(|| RenderError::Config(format!("invalid color '{s}'")))
    };
    match hex.len() {
        6 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => Err(RenderError::Config(format!("invalid color '{s}'"))),
    }
}

/// Plain title template: dark canvas, thin border, darker text panel.
pub fn default_template() -> RgbaImage {
    let (width, height) = TEMPLATE_SIZE;
    let mut image = RgbaImage::from_pixel(width, height, Rgba([30, 30, 30, 255]));
    let border = 5;
    let border_color = Rgba([100, 100, 100, 255]);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if x < border || y < border || x >= width - border || y >= height - border {
            *pixel = border_color;
        }
    }

    let (left, right) = (100, width - 100);
    let (top, bottom) = (height / 4, height - height / 4);
    for y in top..bottom {
        for x in left..right {
            let edge = x < left + 2 || x >= right - 2 || y < top + 2 || y >= bottom - 2;
            let color = if edge {
                Rgba([80, 80, 80, 255])
            } else {
                Rgba([20, 20, 20, 255])
            };
            image.put_pixel(x, y, color);
        }
    }
    image
}

pub fn write_default_template(path: &Path) -> RenderResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    default_template().save(path)?;
    info!("Created title template: {}", path.display());
    Ok(())
}

/// Draw `text` with its top edge at `top`. Returns the x after the last glyph.
fn draw_text(
    canvas: &mut RgbaImage,
    font: &Font,
    text: &str,
    size: f32,
    x: f32,
    top: f32,
    color: Rgba<u8>,
) -> f32 {
    let ascent = font
        .horizontal_line_metrics(size)
        .map(|m| m.ascent)
        .unwrap_or(size * 0.8);
    let baseline = top + ascent;
    let mut pen = x;
    for c in text.chars() {
        let (metrics, coverage) = font.rasterize(c, size);
        let left = pen.round() as i64 + metrics.xmin as i64;
        let glyph_top = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i64;
        for row in 0..metrics.height {
            for col in 0..metrics.width {
                let alpha = coverage[row * metrics.width + col];
                if alpha == 0 {
                    continue;
                }
                let px = left + col as i64;
                let py = glyph_top + row as i64;
                if px < 0 || py < 0 || px >= canvas.width() as i64 || py >= canvas.height() as i64 {
                    continue;
                }
                blend(canvas.get_pixel_mut(px as u32, py as u32), color, alpha);
            }
        }
        pen += metrics.advance_width;
    }
    pen
}

fn blend(dst: &mut Rgba<u8>, color: Rgba<u8>, coverage: u8) {
    let a = (coverage as f32 / 255.0) * (color.0[3] as f32 / 255.0);
    for i in 0..3 {
        dst.0[i] = (color.0[i] as f32 * a + dst.0[i] as f32 * (1.0 - a)).round() as u8;
    }
    let dst_a = dst.0[3] as f32 / 255.0;
    dst.0[3] = ((a + dst_a * (1.0 - a)) * 255.0).round() as u8;
}

fn line_height(font: &Font, size: f32) -> f32 {
    font.horizontal_line_metrics(size)
        .map(|m| m.ascent - m.descent)
        .unwrap_or(size)
}

/// Paints the pre-baked images the compositor overlays.
pub trait CardPainter: Send + Sync {
    fn title_card(&self, title: &str, dest: &Path) -> RenderResult<()>;

    fn thumbnail(&self, background: &Path, title: &str, dest: &Path) -> RenderResult<()>;
}

pub struct FontCardPainter {
    bold: Font,
    template: std::path::PathBuf,
    title_color: Rgba<u8>,
    channel_name: String,
    thumbnail_size: f32,
    thumbnail_color: Rgba<u8>,
}

fn load_font(path: &Path) -> RenderResult<Font> {
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::Font(format!("{}: {e}", path.display())))?;
    Font::from_bytes(bytes, FontSettings::default())
        .map_err(|e| RenderError::Font(format!("{}: {e}", path.display())))
}

impl FontCardPainter {
    pub fn from_config(config: &Config) -> RenderResult<Self> {
        Ok(Self {
            bold: load_font(&config.paths.font_bold)?,
            template: config.paths.title_template.clone(),
            title_color: parse_hex_color(&config.render.title_color)?,
            channel_name: config.render.channel_name.clone(),
            thumbnail_size: config.background.thumbnail_font_size,
            thumbnail_color: parse_hex_color(&config.background.thumbnail_color)?,
        })
    }

    /// A dark rounded-off panel with wrapped white text, used for comment and
    /// story content images.
    pub fn text_card(&self, text: &str, dest: &Path) -> RenderResult<()> {
        let avg_char_width = CARD_FONT_SIZE * 0.5;
        let wrap = ((CARD_WIDTH as f32 - 2.0 * CARD_PADDING) / avg_char_width).max(1.0) as usize;
        let lines = wrap_text(text, wrap);
        let advance = line_height(&self.bold, CARD_FONT_SIZE) + TITLE_PADDING;
        let height = (2.0 * CARD_PADDING + advance * lines.len().max(1) as f32).ceil() as u32;

        let mut card = RgbaImage::from_pixel(CARD_WIDTH, height, Rgba([26, 26, 27, 235]));
        let white = Rgba([255, 255, 255, 255]);
        let mut y = CARD_PADDING;
        for line in &lines {
            draw_text(&mut card, &self.bold, line, CARD_FONT_SIZE, CARD_PADDING, y, white);
            y += advance;
        }
        card.save(dest)?;
        Ok(())
    }
}

impl CardPainter for FontCardPainter {
    fn title_card(&self, title: &str, dest: &Path) -> RenderResult<()> {
        let mut canvas = if self.template.exists() {
            image::open(&self.template)?.to_rgba8()
        } else {
            warn!(
                "Title template {} not found; using the built-in template",
                self.template.display()
            );
            default_template()
        };

        if !self.channel_name.is_empty() {
            draw_text(
                &mut canvas,
                &self.bold,
                &self.channel_name,
                CHANNEL_FONT_SIZE,
                CHANNEL_POS.0,
                CHANNEL_POS.1,
                self.title_color,
            );
        }

        let layout = layout_title(title, canvas.height(), |size| line_height(&self.bold, size));
        let mut y = layout.y;
        for line in &layout.lines {
            draw_text(&mut canvas, &self.bold, line, layout.font_size, layout.x, y, self.title_color);
            y += layout.line_advance;
        }
        canvas.save(dest)?;
        Ok(())
    }

    fn thumbnail(&self, background: &Path, title: &str, dest: &Path) -> RenderResult<()> {
        let mut canvas = image::open(background)?.to_rgba8();
        let (width, height) = canvas.dimensions();
        let margin = width as f32 * 0.05;
        let wrap = ((width as f32 - 2.0 * margin) / (self.thumbnail_size * 0.55)).max(1.0) as usize;
        let lines = wrap_text(title, wrap);
        let advance = line_height(&self.bold, self.thumbnail_size) + TITLE_PADDING;
        let mut y = height as f32 / 2.0 - advance * lines.len() as f32 / 2.0;
        for line in &lines {
            draw_text(&mut canvas, &self.bold, line, self.thumbnail_size, margin, y, self.thumbnail_color);
            y += advance;
        }
        canvas.save(dest)?;
        Ok(())
    }
}
