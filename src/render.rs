//! Render orchestrator: runs the stages of one video job in order and always
//! removes the job's temp workspace afterwards.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::audio::write_concat_list;
use crate::compositor::{AudioVariant, BackgroundAudio, Composition, Watermark, plan_overlays};
use crate::config::Config;
use crate::encoder::{EncodeOutcome, EncoderSelector, MediaTools};
use crate::error::{RenderError, RenderResult};
use crate::metadata::{VideoRecord, save_record};
use crate::progress::ProgressCallback;
use crate::timing::Timeline;
use crate::title_card::CardPainter;
use crate::utils::sanitize_filename;
use crate::workspace::{JobWorkspace, OutputPaths};

/// One video-generation run.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Sanitized thread id; names the temp workspace.
    pub reddit_id: String,
    pub title: String,
    pub subreddit: String,
    /// Narrated comments, or body segments in segmented story mode.
    pub number_of_clips: usize,
    /// Length announced by the caller; must agree with the narration total.
    pub declared_length: Option<f64>,
    pub background_credit: String,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub timeline: Timeline,
    pub length: f64,
    pub main: EncodeOutcome,
    pub narration_only: Option<EncodeOutcome>,
    pub thumbnail: Option<PathBuf>,
}

pub struct Renderer<'a, M: MediaTools, P: CardPainter> {
    config: &'a Config,
    tools: &'a M,
    painter: &'a P,
}

impl<'a, M: MediaTools, P: CardPainter> Renderer<'a, M, P> {
    pub fn new(config: &'a Config, tools: &'a M, painter: &'a P) -> Self {
        Self {
            config,
            tools,
            painter,
        }
    }

    pub fn workspace(&self, job: &RenderJob) -> JobWorkspace {
        JobWorkspace::new(&self.config.paths.temp_root, &job.reddit_id)
    }

    /// Render the job's videos. The temp workspace is removed whether or not
    /// rendering succeeded.
    pub async fn make_final_video(
        &self,
        job: &RenderJob,
        on_progress: ProgressCallback,
    ) -> RenderResult<RenderOutcome> {
        let workspace = self.workspace(job);
        let result = self.run(job, &workspace, on_progress).await;
        if let Err(e) = &result {
            error!("Error in video generation: {}", e);
        }

        info!("Removing temporary files");
        let removed = workspace.cleanup();
        info!("Removed {} temporary director(y/ies)", removed);
        result
    }

    async fn run(
        &self,
        job: &RenderJob,
        workspace: &JobWorkspace,
        on_progress: ProgressCallback,
    ) -> RenderResult<RenderOutcome> {
        let config = self.config;
        let mode = config.render.mode;
        let (width, height) = (config.render.width, config.render.height);

        workspace.ensure()?;
        let outputs = OutputPaths::new(&config.paths.results_root, &job.subreddit, &job.title);
        outputs.ensure()?;

        if job.number_of_clips == 0 && !mode.is_story() {
            warn!("No audio clips to gather; use a different post or narrator");
            return Err(RenderError::NothingToRender);
        }
        workspace.verify_inputs(mode, job.number_of_clips, &config.paths.font_regular)?;

        info!("Creating the final video");
        info!("Preparing background {}x{}", width, height);
        self.tools
            .crop_background(
                &workspace.background(),
                &workspace.background_noaudio(),
                width,
                height,
            )
            .await?;

        let narration = workspace.narration_files(mode, job.number_of_clips);
        let entries: Vec<String> = narration
            .iter()
            .map(|p| relative_entry(p, &workspace.root))
            .collect();
        write_concat_list(&workspace.concat_list(), &entries)?;
        self.tools
            .concat_audio(&workspace.concat_list(), &workspace.narration_track())
            .await?;
        info!("Concatenated {} narration clips", narration.len());

        let mut durations = Vec::with_capacity(narration.len());
        for path in &narration {
            let duration = self.tools.probe_duration(path).await?;
            info!("Clip {} duration: {:.2}s", path.display(), duration);
            durations.push(duration);
        }
        let timeline = Timeline::from_durations(&durations)?;
        if timeline.is_empty() {
            return Err(RenderError::NothingToRender);
        }
        for interval in timeline.intervals() {
            debug!(
                segment = interval.segment_index,
                "{:.2}s..{:.2}s ({:.2}s)",
                interval.start,
                interval.end,
                interval.duration()
            );
        }
        let length = timeline.reconcile_length(job.declared_length)?;
        info!("Video will be {:.2} seconds long over {} segments", length, timeline.len());

        let title_card = workspace.title_card();
        self.painter
            .title_card(&sanitize_filename(&job.title), &title_card)?;
        let title_interval = *timeline.get(0).ok_or(RenderError::NothingToRender)?;
        let overlays = plan_overlays(mode, &timeline, workspace, width)?;

        let composition = Composition {
            width,
            height,
            opacity: config.render.opacity,
            background: workspace.background_noaudio(),
            title_card,
            title_interval,
            overlays,
            narration: workspace.narration_track(),
            background_audio: self.background_audio(workspace),
            watermark: Watermark {
                text: job.background_credit.clone(),
                font_file: config.paths.font_regular.clone(),
            },
            length,
        };

        let selector = EncoderSelector::new(self.tools, &config.encoder);
        info!("Rendering the video");
        let main = selector
            .encode(
                &composition,
                AudioVariant::Mixed,
                &outputs.main_video(),
                &workspace.progress_file("main"),
                length,
                on_progress.clone(),
            )
            .await?;

        let narration_only = if config.background.enable_extra_audio {
            info!("Rendering the narration-only video");
            Some(
                selector
                    .encode(
                        &composition,
                        AudioVariant::NarrationOnly,
                        &outputs.narration_only_video(),
                        &workspace.progress_file("tts"),
                        length,
                        on_progress,
                    )
                    .await,
            )
        } else {
            None
        };

        let thumbnail = self.thumbnail(job, &outputs);
        self.persist(job, &outputs);

        let narration_only = narration_only.transpose()?;
        info!("Done! The video is at {}", main.output.display());
        Ok(RenderOutcome {
            timeline,
            length,
            main,
            narration_only,
            thumbnail,
        })
    }

    fn background_audio(&self, workspace: &JobWorkspace) -> Option<BackgroundAudio> {
        let volume = self.config.background.audio_volume;
        let path = workspace.background_audio();
        if volume > 0.0 && !path.exists() {
            warn!(
                "Background audio {} not found; rendering narration only",
                path.display()
            );
            return None;
        }
        BackgroundAudio::new(path, volume)
    }

    /// Best effort; failures are logged.
    fn thumbnail(&self, job: &RenderJob, outputs: &OutputPaths) -> Option<PathBuf> {
        let background = &self.config.background;
        if !background.thumbnail {
            return None;
        }
        let Some(source) = first_png(&background.backgrounds_dir) else {
            warn!("No png files found in {}", background.backgrounds_dir.display());
            return None;
        };
        let dest = outputs.thumbnail();
        match self.painter.thumbnail(&source, &job.title, &dest) {
            Ok(()) => {
                info!("Created thumbnail {}", dest.display());
                Some(dest)
            }
            Err(e) => {
                warn!("Error creating thumbnail: {}", e);
                None
            }
        }
    }

    fn persist(&self, job: &RenderJob, outputs: &OutputPaths) {
        let record = VideoRecord {
            subreddit: job.subreddit.clone(),
            filename: outputs.file_name(),
            title: job.title.clone(),
            thread_id: job.reddit_id.clone(),
            background_credit: job.background_credit.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = save_record(&self.config.paths.metadata, record) {
            warn!("Failed to save video metadata: {}", e);
        }
    }
}

fn relative_entry(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn first_png(dir: &Path) -> Option<PathBuf> {
    let mut pngs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    pngs.sort();
    pngs.into_iter().next()
}
