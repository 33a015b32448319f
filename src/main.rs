mod args;
mod audio;
mod compositor;
mod config;
mod encoder;
mod error;
mod metadata;
mod progress;
mod reddit;
mod render;
mod timing;
mod title_card;
mod tts;
mod utils;
mod workspace;

use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, reload};

use crate::args::Args;
use crate::audio::{wav_duration_seconds, write_concat_list};
use crate::config::{Config, StoryMode};
use crate::encoder::{FfmpegTools, MediaTools};
use crate::error::ErrorReport;
use crate::progress::ProgressCallback;
use crate::reddit::{RedditClient, RedditThread, mark_used};
use crate::render::{RenderJob, Renderer};
use crate::title_card::{FontCardPainter, write_default_template};
use crate::tts::PiperNarrator;
use crate::utils::{chunk_text, sanitize_id};
use crate::workspace::JobWorkspace;

const PROGRESS_STEPS: u64 = 1000;

/// `RUST_LOG` wins over the configured level.
fn filter_directive(rust_log: Option<String>, config_level: &str) -> String {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config_level.to_string())
}

fn env_filter(config_level: &str) -> EnvFilter {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), config_level);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging is up before the config loads so its warnings are visible; the
    // configured level is applied afterwards.
    let (filter, filter_handle) = reload::Layer::new(env_filter("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let loaded = Config::load(&args.config);
    if let Ok(config) = &loaded {
        if let Err(e) = filter_handle.reload(env_filter(&config.logging.level)) {
            warn!("Could not apply log level {}: {}", config.logging.level, e);
        }
    }

    let result = match loaded {
        Ok(mut config) => {
            args.apply(&mut config);
            match config.validate() {
                Ok(()) => run(&args, &config).await,
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(anyhow::Error::from(e).context(format!("Loading {}", args.config.display()))),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let report = ErrorReport::from_anyhow(&e);
            match serde_json::to_string(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to serialize error report: {}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, config: &Config) -> anyhow::Result<()> {
    if args.create_template {
        write_default_template(&config.paths.title_template)?;
        info!("Title template written to {}", config.paths.title_template.display());
        return Ok(());
    }

    info!("Starting reddit video generation pipeline");
    if !args.background.exists() {
        anyhow::bail!("Background video not found: {}", args.background.display());
    }

    let mode = config.render.mode;
    info!(
        "Fetching thread from r/{} (up to {} posts)",
        config.reddit.subreddit, config.reddit.try_posts
    );
    let thread = RedditClient::new()
        .fetch_thread(&config.reddit, mode.is_story(), &config.paths.used_posts)
        .await?;

    let tools = FfmpegTools::new();
    let painter = FontCardPainter::from_config(config)?;
    let narrator = PiperNarrator::from_config(&config.tts);
    let workspace = JobWorkspace::new(&config.paths.temp_root, &sanitize_id(&thread.id));

    let staged = stage_job(args, config, &thread, &workspace, &narrator, &painter, &tools).await;
    let job = match staged {
        Ok(job) => job,
        Err(e) => {
            workspace.cleanup();
            return Err(e);
        }
    };

    let bar = ProgressBar::new(PROGRESS_STEPS);
    bar.set_style(
        ProgressStyle::with_template("{spinner} rendering [{bar:40}] {percent}% ({elapsed})")?
            .progress_chars("=> "),
    );
    let on_progress: ProgressCallback = {
        let bar = bar.clone();
        Arc::new(move |fraction| bar.set_position((fraction * PROGRESS_STEPS as f64) as u64))
    };

    let renderer = Renderer::new(config, &tools, &painter);
    let outcome = renderer.make_final_video(&job, on_progress).await;
    bar.finish_and_clear();
    let outcome = outcome?;
    mark_used(&config.paths.used_posts, &thread.id)?;

    info!(
        backend = %outcome.main.backend,
        attempt = outcome.main.attempt,
        "Rendered {}",
        outcome.main.output.display()
    );
    println!("main: {} via {}", outcome.main.output.display(), outcome.main.backend);
    if let Some(tts) = &outcome.narration_only {
        println!("narration-only: {} via {}", tts.output.display(), tts.backend);
    }
    if let Some(thumbnail) = &outcome.thumbnail {
        println!("thumbnail: {}", thumbnail.display());
    }
    Ok(())
}

/// Narrate the thread and write every input the renderer expects into the
/// workspace.
async fn stage_job(
    args: &Args,
    config: &Config,
    thread: &RedditThread,
    workspace: &JobWorkspace,
    narrator: &PiperNarrator,
    painter: &FontCardPainter,
    tools: &FfmpegTools,
) -> anyhow::Result<RenderJob> {
    workspace.ensure()?;

    fs::copy(&args.background, workspace.background())
        .with_context(|| format!("Copying background {}", args.background.display()))?;
    if let Some(audio) = &args.background_audio {
        fs::copy(audio, workspace.background_audio())
            .with_context(|| format!("Copying background audio {}", audio.display()))?;
    }

    info!("Narrating title");
    narrator.narrate(&thread.title, &workspace.title_audio()).await?;

    let mode = config.render.mode;
    let number_of_clips = match mode {
        StoryMode::Comments => {
            for (i, comment) in thread.comments.iter().enumerate() {
                info!("Narrating comment {}/{}", i + 1, thread.comments.len());
                narrator.narrate(&comment.body, &workspace.comment_audio(i)).await?;
                painter.text_card(&comment.body, &workspace.comment_image(i))?;
            }
            thread.comments.len()
        }
        StoryMode::StorySingle => {
            let chunks = chunk_text(&thread.selftext, config.tts.chunk_chars);
            anyhow::ensure!(!chunks.is_empty(), "Thread {} has no story body", thread.id);
            let mut parts = Vec::with_capacity(chunks.len());
            for (k, chunk) in chunks.iter().enumerate() {
                let name = format!("postaudio-part{k}.wav");
                info!("Narrating story part {}/{}", k + 1, chunks.len());
                narrator.narrate(chunk, &workspace.audio_dir.join(&name)).await?;
                parts.push(format!("audio/{name}"));
            }
            let list = workspace.root.join("story_parts.txt");
            write_concat_list(&list, &parts)?;
            tools.concat_audio(&list, &workspace.story_audio()).await?;
            painter.text_card(&thread.selftext, &workspace.story_content_image())?;
            1
        }
        StoryMode::StorySegments => {
            let chunks = chunk_text(&thread.selftext, config.tts.chunk_chars);
            for (i, chunk) in chunks.iter().enumerate() {
                info!("Narrating story segment {}/{}", i + 1, chunks.len());
                narrator.narrate(chunk, &workspace.story_segment_audio(i)).await?;
                painter.text_card(chunk, &workspace.story_segment_image(i))?;
            }
            chunks.len()
        }
    };

    let mut declared_length = 0.0;
    for path in workspace.narration_files(mode, number_of_clips) {
        match wav_duration_seconds(&path) {
            Ok(d) => declared_length += d,
            Err(e) => {
                warn!("Could not read {}: {}; length check skipped", path.display(), e);
                return Ok(job(config, thread, number_of_clips, None));
            }
        }
    }
    debug!("Declared length {:.2}s", declared_length);
    Ok(job(config, thread, number_of_clips, Some(declared_length)))
}

fn job(
    config: &Config,
    thread: &RedditThread,
    number_of_clips: usize,
    declared_length: Option<f64>,
) -> RenderJob {
    RenderJob {
        reddit_id: sanitize_id(&thread.id),
        title: thread.title.clone(),
        subreddit: config.reddit.subreddit.clone(),
        number_of_clips,
        declared_length,
        background_credit: config.background.credit.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_config_level() {
        assert_eq!(filter_directive(Some("debug".into()), "info"), "debug");
        assert_eq!(filter_directive(None, "warn"), "warn");
        assert_eq!(filter_directive(Some("  ".into()), "warn"), "warn");
    }
}
