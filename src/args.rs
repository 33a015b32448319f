use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, StoryMode};

#[derive(Parser, Debug)]
#[clap(about = "Render short vertical videos from Reddit threads")]
pub struct Args {
    #[clap(long, default_value = "config.toml")]
    pub config: PathBuf,

    #[clap(long)]
    pub subreddit: Option<String>,

    /// Render this thread id instead of picking from the hot listing.
    #[clap(long)]
    pub post_id: Option<String>,

    #[clap(long, value_enum)]
    pub mode: Option<StoryMode>,

    #[clap(long, default_value = "./res/bg.mp4")]
    pub background: PathBuf,

    #[clap(long)]
    pub background_audio: Option<PathBuf>,

    #[clap(long)]
    pub background_credit: Option<String>,

    #[clap(long)]
    pub piper_model: Option<PathBuf>,

    #[clap(long)]
    pub try_posts: Option<usize>,

    #[clap(long)]
    pub chunk_chars: Option<usize>,

    /// Write the default title template and exit.
    #[clap(long)]
    pub create_template: bool,
}

impl Args {
    /// Overlay command-line flags onto the loaded config.
    pub fn apply(&self, config: &mut Config) {
        if let Some(subreddit) = &self.subreddit {
            config.reddit.subreddit = subreddit.clone();
        }
        if let Some(post_id) = &self.post_id {
            config.reddit.post_id = Some(post_id.clone());
        }
        if let Some(mode) = self.mode {
            config.render.mode = mode;
        }
        if let Some(credit) = &self.background_credit {
            config.background.credit = credit.clone();
        }
        if let Some(model) = &self.piper_model {
            config.tts.piper_model = model.clone();
        }
        if let Some(try_posts) = self.try_posts {
            config.reddit.try_posts = try_posts;
        }
        if let Some(chunk_chars) = self.chunk_chars {
            config.tts.chunk_chars = chunk_chars;
        }
    }
}
