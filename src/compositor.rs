//! Overlay compositor: describes the layered video (background, title card,
//! per-segment cards) and the paired audio as an ffmpeg filter graph.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::debug;

use crate::config::StoryMode;
use crate::encoder::FilterProfile;
use crate::error::{RenderError, RenderResult};
use crate::timing::{Interval, Timeline};
use crate::workspace::JobWorkspace;

/// Segment cards are scaled to this share of the target width.
pub const SCREENSHOT_WIDTH_PERCENT: u32 = 45;
const WATERMARK_FONT_SIZE: u32 = 5;

pub fn screenshot_width(target_width: u32) -> u32 {
    target_width * SCREENSHOT_WIDTH_PERCENT / 100
}

/// One card shown while its narration segment plays.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOverlay {
    pub image: PathBuf,
    pub interval: Interval,
    /// Scale the card's alpha by the job opacity.
    pub translucent: bool,
}

#[derive(Debug, Clone)]
pub struct BackgroundAudio {
    pub path: PathBuf,
    pub volume: f64,
}

impl BackgroundAudio {
    /// `None` when the volume is zero: the track is skipped, not mixed silent.
    pub fn new(path: PathBuf, volume: f64) -> Option<Self> {
        (volume > 0.0).then_some(Self { path, volume })
    }
}

#[derive(Debug, Clone)]
pub struct Watermark {
    pub text: String,
    pub font_file: PathBuf,
}

/// Which audio the encode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioVariant {
    /// Narration mixed with the background track, when there is one.
    Mixed,
    NarrationOnly,
}

/// Everything ffmpeg needs besides codec settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeGraph {
    pub inputs: Vec<PathBuf>,
    pub filter_complex: String,
    pub video_map: String,
    pub audio_map: String,
    /// Output length in seconds; the encode is cut here.
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub width: u32,
    pub height: u32,
    pub opacity: f64,
    /// Cropped, silent background video.
    pub background: PathBuf,
    pub title_card: PathBuf,
    pub title_interval: Interval,
    pub overlays: Vec<SegmentOverlay>,
    pub narration: PathBuf,
    pub background_audio: Option<BackgroundAudio>,
    pub watermark: Watermark,
    /// Total narration length. Background video and audio run longer.
    pub length: f64,
}

impl Composition {
    /// Build the filter graph for one encoder profile and audio variant.
    pub fn graph(&self, profile: &FilterProfile, audio: AudioVariant) -> EncodeGraph {
        let simplified = matches!(profile, FilterProfile::Simplified { .. });
        let card_width = screenshot_width(self.width);

        let mut inputs = vec![self.background.clone(), self.title_card.clone()];
        inputs.extend(self.overlays.iter().map(|o| o.image.clone()));
        let narration_index = inputs.len();
        inputs.push(self.narration.clone());

        let mut graph = String::new();
        let _ = write!(
            graph,
            "[0:v]scale={w}:{h},setsar=1[base];[1:v]scale={card_width}:-1[title];",
            w = self.width,
            h = self.height,
        );
        for (i, overlay) in self.overlays.iter().enumerate() {
            let _ = write!(graph, "[{}:v]scale={card_width}:-1", i + 2);
            if overlay.translucent && !simplified {
                let _ = write!(
                    graph,
                    ",format=rgba,colorchannelmixer=aa={}",
                    format_number(self.opacity)
                );
            }
            let _ = write!(graph, "[card{i}];");
        }

        let _ = write!(
            graph,
            "[base][title]{}[layer0];",
            overlay_filter(&self.title_interval)
        );
        let mut last = "layer0".to_string();
        for (i, overlay) in self.overlays.iter().enumerate() {
            let next = format!("layer{}", i + 1);
            let _ = write!(
                graph,
                "[{last}][card{i}]{}[{next}];",
                overlay_filter(&overlay.interval)
            );
            last = next;
        }

        let _ = write!(graph, "[{last}]");
        let mut tail = Vec::new();
        if !simplified {
            tail.push(drawtext_filter(&self.watermark));
        }
        match profile {
            FilterProfile::Software => tail.push("format=yuv420p".to_string()),
            FilterProfile::HwUpload { upload } | FilterProfile::Simplified { upload } => {
                tail.push(upload.clone())
            }
        }
        let _ = write!(graph, "{}[v]", tail.join(","));

        let mut audio_map = format!("{narration_index}:a");
        if audio == AudioVariant::Mixed {
            if let Some(bg) = &self.background_audio {
                let bg_index = inputs.len();
                inputs.push(bg.path.clone());
                let _ = write!(
                    graph,
                    ";[{bg_index}:a]volume={}[bga];[{narration_index}:a][bga]amix=inputs=2:duration=longest[a]",
                    format_number(bg.volume)
                );
                audio_map = "[a]".to_string();
            }
        }

        debug!(filter = %graph, "Built filter graph");
        EncodeGraph {
            inputs,
            filter_complex: graph,
            video_map: "[v]".to_string(),
            audio_map,
            duration: self.length,
        }
    }
}

/// Centered overlay, present only while `start <= t < end`.
fn overlay_filter(interval: &Interval) -> String {
    format!(
        "overlay=x=(main_w-overlay_w)/2:y=(main_h-overlay_h)/2:enable='gte(t,{:.3})*lt(t,{:.3})'",
        interval.start, interval.end
    )
}

fn drawtext_filter(watermark: &Watermark) -> String {
    let text: String = watermark
        .text
        .chars()
        .filter(|c| !matches!(c, '\'' | ':' | '\\' | '%' | ';' | ',' | '[' | ']'))
        .collect();
    let text = if text.trim().is_empty() { " ".to_string() } else { text };
    format!(
        "drawtext=text='{text}':x=(w-text_w):y=(h-text_h):fontsize={WATERMARK_FONT_SIZE}:fontcolor=White:fontfile='{}'",
        watermark.font_file.display()
    )
}

fn format_number(value: f64) -> String {
    let s = format!("{value:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() { "0".to_string() } else { s.to_string() }
}

/// Pick the card for every narration segment after the title.
///
/// Comment mode needs `comment_{i}.png` per comment. Single-narration story
/// mode shows one content image for the whole body. Segmented story mode uses
/// `story_content-{i}.png` when present and a transparent placeholder otherwise.
pub fn plan_overlays(
    mode: StoryMode,
    timeline: &Timeline,
    workspace: &JobWorkspace,
    target_width: u32,
) -> RenderResult<Vec<SegmentOverlay>> {
    let mut overlays = Vec::new();
    for interval in timeline.intervals().iter().skip(1) {
        let i = interval.segment_index - 1;
        let (image, translucent) = match mode {
            StoryMode::Comments => (require(workspace.comment_image(i))?, true),
            StoryMode::StorySingle => (require(workspace.story_content_image())?, false),
            StoryMode::StorySegments => {
                let content = workspace.story_segment_image(i);
                if content.exists() {
                    (content, false)
                } else {
                    let placeholder = workspace.placeholder_image(i);
                    write_transparent_placeholder(&placeholder, screenshot_width(target_width))?;
                    (placeholder, false)
                }
            }
        };
        overlays.push(SegmentOverlay {
            image,
            interval: *interval,
            translucent,
        });
    }
    Ok(overlays)
}

fn require(path: PathBuf) -> RenderResult<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(RenderError::AssetMissing { path })
    }
}

/// Fully transparent square PNG.
pub fn write_transparent_placeholder(path: &Path, size: u32) -> RenderResult<()> {
    RgbaImage::new(size.max(1), size.max(1)).save(path)?;
    Ok(())
}
