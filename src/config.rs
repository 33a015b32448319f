//! Per-job configuration, loaded once from `config.toml` and passed by reference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::encoder::{BackendConfig, default_backends};
use crate::error::{RenderError, RenderResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reddit: RedditConfig,
    pub render: RenderConfig,
    pub background: BackgroundConfig,
    pub encoder: EncoderConfig,
    pub tts: TtsConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub subreddit: String,
    /// Render this thread instead of picking one from the hot listing.
    pub post_id: Option<String>,
    pub try_posts: usize,
    pub max_comments: usize,
    pub max_comment_length: usize,
}

/// How the body of a thread is narrated and shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoryMode {
    /// One narration clip and one card per comment.
    Comments,
    /// The whole post body as a single narration clip over one content image.
    StorySingle,
    /// The post body split into several narration clips.
    StorySegments,
}

impl StoryMode {
    pub fn is_story(self) -> bool {
        !matches!(self, StoryMode::Comments)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Alpha multiplier for comment cards, 0.0..=1.0.
    pub opacity: f64,
    pub mode: StoryMode,
    pub channel_name: String,
    pub title_color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Volume of the background track mixed under the narration. 0 disables it.
    pub audio_volume: f64,
    /// Also render a narration-only variant into `OnlyTTS/`.
    pub enable_extra_audio: bool,
    pub thumbnail: bool,
    pub thumbnail_font_size: f32,
    pub thumbnail_color: String,
    pub backgrounds_dir: PathBuf,
    pub credit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub piper_model: PathBuf,
    /// Longest text piper is asked to speak in one call.
    pub max_chars: usize,
    /// Target size of story chunks; must not exceed `max_chars`.
    pub chunk_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub temp_root: PathBuf,
    pub results_root: PathBuf,
    pub title_template: PathBuf,
    pub font_bold: PathBuf,
    pub font_regular: PathBuf,
    pub metadata: PathBuf,
    pub used_posts: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddit: "AskReddit".to_string(),
            post_id: None,
            try_posts: 100,
            max_comments: 10,
            max_comment_length: 500,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            opacity: 0.9,
            mode: StoryMode::Comments,
            channel_name: String::new(),
            title_color: "#FFFFFF".to_string(),
        }
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            audio_volume: 0.15,
            enable_extra_audio: false,
            thumbnail: false,
            thumbnail_font_size: 96.0,
            thumbnail_color: "#FFFFFF".to_string(),
            backgrounds_dir: PathBuf::from("assets/backgrounds"),
            credit: String::new(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 2000,
            timeout_secs: 600,
            backends: default_backends(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            piper_model: PathBuf::from("tts/en_US-amy-medium.onnx"),
            max_chars: 1000,
            chunk_chars: 250,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_root: PathBuf::from("assets/temp"),
            results_root: PathBuf::from("results"),
            title_template: PathBuf::from("assets/title_template.png"),
            font_bold: PathBuf::from("fonts/Roboto-Bold.ttf"),
            font_regular: PathBuf::from("fonts/Roboto-Regular.ttf"),
            metadata: PathBuf::from("video_creation/data/videos.json"),
            used_posts: PathBuf::from("config/used_posts.json"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> RenderResult<Self> {
        if !path.exists() {
            warn!("Config file {} not found; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> RenderResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| RenderError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.render.width == 0 || self.render.height == 0 {
            return Err(RenderError::Config(
                "render.width and render.height must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.render.opacity) {
            return Err(RenderError::Config(format!(
                "render.opacity must be within 0..=1, got {}",
                self.render.opacity
            )));
        }
        if self.background.audio_volume < 0.0 {
            return Err(RenderError::Config(
                "background.audio_volume must not be negative".to_string(),
            ));
        }
        if self.encoder.backends.is_empty() {
            return Err(RenderError::Config(
                "encoder.backends must list at least one backend".to_string(),
            ));
        }
        if self.tts.chunk_chars == 0 || self.tts.chunk_chars > self.tts.max_chars {
            return Err(RenderError::Config(format!(
                "tts.chunk_chars must be within 1..={}, got {}",
                self.tts.max_chars, self.tts.chunk_chars
            )));
        }
        if self.reddit.max_comment_length > self.tts.max_chars {
            return Err(RenderError::Config(format!(
                "reddit.max_comment_length ({}) exceeds tts.max_chars ({})",
                self.reddit.max_comment_length, self.tts.max_chars
            )));
        }
        if self.encoder.max_retries == 0 {
            return Err(RenderError::Config(
                "encoder.max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
