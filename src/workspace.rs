//! Job-owned directories: temp workspace, result locations, input checks, cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::StoryMode;
use crate::error::{RenderError, RenderResult};
use crate::utils::{MAX_NAME_BYTES, sanitize_filename};

const VIDEO_EXTENSION: &str = "mp4";

/// Temp directory of one render job, `<temp_root>/<reddit_id>/`.
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub audio_dir: PathBuf,
    pub png_dir: PathBuf,
}

impl JobWorkspace {
    pub fn new(temp_root: &Path, reddit_id: &str) -> Self {
        let root = temp_root.join(reddit_id);
        Self {
            audio_dir: root.join("audio"),
            png_dir: root.join("png"),
            root,
        }
    }

    /// Create the workspace directories. Safe to call repeatedly.
    pub fn ensure(&self) -> RenderResult<()> {
        for dir in [&self.root, &self.audio_dir, &self.png_dir] {
            fs::create_dir_all(dir)?;
        }
        debug!("Workspace ready at {}", self.root.display());
        Ok(())
    }

    pub fn background(&self) -> PathBuf {
        self.root.join("background.mp4")
    }

    pub fn background_noaudio(&self) -> PathBuf {
        self.root.join("background_noaudio.mp4")
    }

    pub fn background_audio(&self) -> PathBuf {
        self.root.join("background.mp3")
    }

    pub fn narration_track(&self) -> PathBuf {
        self.root.join("audio.wav")
    }

    pub fn concat_list(&self) -> PathBuf {
        self.root.join("files.txt")
    }

    pub fn progress_file(&self, variant: &str) -> PathBuf {
        self.root.join(format!("progress_{variant}.txt"))
    }

    pub fn title_audio(&self) -> PathBuf {
        self.audio_dir.join("title.wav")
    }

    pub fn comment_audio(&self, i: usize) -> PathBuf {
        self.audio_dir.join(format!("{i}.wav"))
    }

    pub fn story_audio(&self) -> PathBuf {
        self.audio_dir.join("postaudio.wav")
    }

    pub fn story_segment_audio(&self, i: usize) -> PathBuf {
        self.audio_dir.join(format!("postaudio-{i}.wav"))
    }

    pub fn title_card(&self) -> PathBuf {
        self.png_dir.join("title.png")
    }

    pub fn comment_image(&self, i: usize) -> PathBuf {
        self.png_dir.join(format!("comment_{i}.png"))
    }

    pub fn story_content_image(&self) -> PathBuf {
        self.png_dir.join("story_content.png")
    }

    pub fn story_segment_image(&self, i: usize) -> PathBuf {
        self.png_dir.join(format!("story_content-{i}.png"))
    }

    pub fn placeholder_image(&self, i: usize) -> PathBuf {
        self.png_dir.join(format!("trs{i}.png"))
    }

    /// Narration clips in playback order, title first.
    pub fn narration_files(&self, mode: StoryMode, number_of_clips: usize) -> Vec<PathBuf> {
        let mut files = vec![self.title_audio()];
        match mode {
            StoryMode::Comments => files.extend((0..number_of_clips).map(|i| self.comment_audio(i))),
            StoryMode::StorySingle => files.push(self.story_audio()),
            StoryMode::StorySegments => {
                files.extend((0..number_of_clips).map(|i| self.story_segment_audio(i)))
            }
        }
        files
    }

    /// Every upstream artifact that must exist before rendering starts,
    /// including the watermark font.
    ///
    /// Per-segment story images are optional (a placeholder is generated),
    /// so they are not listed.
    pub fn required_inputs(
        &self,
        mode: StoryMode,
        number_of_clips: usize,
        font: &Path,
    ) -> Vec<PathBuf> {
        let mut required = vec![self.background()];
        required.extend(self.narration_files(mode, number_of_clips));
        match mode {
            StoryMode::Comments => {
                required.extend((0..number_of_clips).map(|i| self.comment_image(i)))
            }
            StoryMode::StorySingle => required.push(self.story_content_image()),
            StoryMode::StorySegments => {}
        }
        required.push(font.to_path_buf());
        required
    }

    /// Check all required inputs, reporting every missing path at once.
    pub fn verify_inputs(
        &self,
        mode: StoryMode,
        number_of_clips: usize,
        font: &Path,
    ) -> RenderResult<()> {
        let missing: Vec<PathBuf> = self
            .required_inputs(mode, number_of_clips, font)
            .into_iter()
            .filter(|p| !p.exists())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        for path in &missing {
            warn!("Missing file: {}", path.display());
        }
        for dir in [&self.root, &self.audio_dir, &self.png_dir] {
            debug!("Contents of {}: {:?}", dir.display(), list_dir(dir));
        }
        Err(RenderError::MissingInput { paths: missing })
    }

    /// Remove the whole workspace. Returns how many directories were removed.
    pub fn cleanup(&self) -> usize {
        if !self.root.exists() {
            return 0;
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                info!("Cleaned up {}", self.root.display());
                1
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", self.root.display(), e);
                0
            }
        }
    }
}

fn list_dir(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Result locations for one thread under `<results_root>/<subreddit>/`.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub only_tts_dir: PathBuf,
    pub thumbnails_dir: PathBuf,
    pub stem: String,
}

impl OutputPaths {
    pub fn new(results_root: &Path, subreddit: &str, title: &str) -> Self {
        let dir = results_root.join(sanitize_filename(subreddit));
        Self {
            only_tts_dir: dir.join("OnlyTTS"),
            thumbnails_dir: dir.join("thumbnails"),
            dir,
            stem: output_stem(title),
        }
    }

    pub fn ensure(&self) -> RenderResult<()> {
        for dir in [&self.dir, &self.only_tts_dir, &self.thumbnails_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn file_name(&self) -> String {
        format!("{}.{VIDEO_EXTENSION}", self.stem)
    }

    pub fn main_video(&self) -> PathBuf {
        self.dir.join(self.file_name())
    }

    pub fn narration_only_video(&self) -> PathBuf {
        self.only_tts_dir.join(self.file_name())
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.thumbnails_dir.join(format!("{}.png", self.stem))
    }
}

/// Sanitized title, shortened so that `<stem>.mp4` fits in [`MAX_NAME_BYTES`].
pub fn output_stem(title: &str) -> String {
    let mut stem = sanitize_filename(title);
    while stem.len() + VIDEO_EXTENSION.len() + 1 > MAX_NAME_BYTES {
        stem.pop();
    }
    let stem = stem.trim_end().to_string();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(tmp.path(), "abc123");
        ws.ensure().unwrap();
        ws.ensure().unwrap();
        assert!(ws.audio_dir.is_dir());
        assert!(ws.png_dir.is_dir());
    }

    #[test]
    fn narration_order_starts_with_title() {
        let ws = JobWorkspace::new(Path::new("/tmp/x"), "id");
        let files = ws.narration_files(StoryMode::Comments, 2);
        assert_eq!(files, vec![ws.title_audio(), ws.comment_audio(0), ws.comment_audio(1)]);

        let story = ws.narration_files(StoryMode::StorySingle, 7);
        assert_eq!(story, vec![ws.title_audio(), ws.story_audio()]);

        let segments = ws.narration_files(StoryMode::StorySegments, 2);
        assert_eq!(segments[2], ws.story_segment_audio(1));
    }

    #[test]
    fn verify_enumerates_every_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(tmp.path(), "thread");
        ws.ensure().unwrap();
        fs::write(ws.background(), b"video").unwrap();
        fs::write(ws.title_audio(), b"audio").unwrap();
        fs::write(ws.comment_audio(0), b"audio").unwrap();
        let font = tmp.path().join("fonts/Roboto-Regular.ttf");

        let err = ws.verify_inputs(StoryMode::Comments, 2, &font).unwrap_err();
        match err {
            RenderError::MissingInput { paths } => {
                assert_eq!(
                    paths,
                    vec![ws.comment_audio(1), ws.comment_image(0), ws.comment_image(1), font]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn story_segments_do_not_require_images() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(tmp.path(), "thread");
        ws.ensure().unwrap();
        let font = tmp.path().join("font.ttf");
        for path in [ws.background(), ws.title_audio(), ws.story_segment_audio(0), font.clone()] {
            fs::write(path, b"x").unwrap();
        }
        ws.verify_inputs(StoryMode::StorySegments, 1, &font).unwrap();
    }

    #[test]
    fn cleanup_removes_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::new(tmp.path(), "gone");
        ws.ensure().unwrap();
        fs::write(ws.title_card(), b"png").unwrap();
        assert_eq!(ws.cleanup(), 1);
        assert!(!ws.root.exists());
        assert_eq!(ws.cleanup(), 0);
    }

    #[test]
    fn output_names_fit_filesystem_limits() {
        let out = OutputPaths::new(Path::new("results"), "AskReddit", &"ü".repeat(300));
        assert!(out.file_name().len() <= MAX_NAME_BYTES);
        assert_eq!(out.main_video(), Path::new("results/AskReddit").join(out.file_name()));
        assert_eq!(
            out.narration_only_video(),
            Path::new("results/AskReddit/OnlyTTS").join(out.file_name())
        );
    }

    #[test]
    fn empty_title_gets_a_name() {
        assert_eq!(output_stem("\u{200B}//"), "untitled");
    }
}
