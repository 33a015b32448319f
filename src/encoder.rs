//! Encoder backend selection: walk an ordered chain of ffmpeg configurations
//! (hardware first, software last), retrying the whole chain a few times.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::audio::wav_duration_seconds;
use crate::compositor::{AudioVariant, Composition, EncodeGraph};
use crate::config::EncoderConfig;
use crate::error::{RenderError, RenderResult};
use crate::progress::{ProgressCallback, ProgressMonitor};

const RENDER_DEVICE: &str = "/dev/dri/renderD128";
const DIAGNOSTIC_TAIL_LINES: usize = 20;
/// How long to wait for stderr after killing a timed-out encoder.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// How the final video chain of the filter graph is terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterProfile {
    /// CPU filters, `yuv420p` output.
    #[default]
    Software,
    /// CPU filters, then upload frames to the device with `upload`.
    HwUpload { upload: String },
    /// Like `HwUpload` but without per-card alpha and the watermark text,
    /// for drivers that reject the full graph.
    Simplified { upload: String },
}

/// One encoder configuration in the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    /// Device node the backend needs; the backend is skipped when it is absent.
    #[serde(default)]
    pub device: Option<PathBuf>,
    /// Arguments placed before the inputs (device initialisation).
    #[serde(default)]
    pub input_args: Vec<String>,
    #[serde(default)]
    pub filter: FilterProfile,
    #[serde(default)]
    pub codec_args: Vec<String>,
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// QSV, VA-API, VA-API with a simplified graph, then libx264.
pub fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "qsv".to_string(),
            device: Some(PathBuf::from(RENDER_DEVICE)),
            input_args: args(&["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]),
            filter: FilterProfile::HwUpload {
                upload: "format=nv12,hwupload=extra_hw_frames=64".to_string(),
            },
            codec_args: args(&["-c:v", "h264_qsv", "-preset", "medium", "-global_quality", "23"]),
        },
        BackendConfig {
            name: "vaapi".to_string(),
            device: Some(PathBuf::from(RENDER_DEVICE)),
            input_args: args(&["-vaapi_device", RENDER_DEVICE]),
            filter: FilterProfile::HwUpload {
                upload: "format=nv12,hwupload".to_string(),
            },
            codec_args: args(&["-c:v", "h264_vaapi", "-qp", "23"]),
        },
        BackendConfig {
            name: "vaapi-simplified".to_string(),
            device: Some(PathBuf::from(RENDER_DEVICE)),
            input_args: args(&["-vaapi_device", RENDER_DEVICE]),
            filter: FilterProfile::Simplified {
                upload: "format=nv12,hwupload".to_string(),
            },
            codec_args: args(&["-c:v", "h264_vaapi", "-qp", "23"]),
        },
        BackendConfig {
            name: "software".to_string(),
            device: None,
            input_args: Vec::new(),
            filter: FilterProfile::Software,
            codec_args: args(&[
                "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-tune", "fastdecode",
                "-b:v", "20M",
            ]),
        },
    ]
}

/// A fully built ffmpeg command line for one backend.
#[derive(Debug, Clone)]
pub struct EncodeInvocation {
    pub backend: String,
    pub args: Vec<String>,
    pub output: PathBuf,
    pub progress_file: PathBuf,
}

impl EncodeInvocation {
    pub fn new(
        backend: &BackendConfig,
        graph: &EncodeGraph,
        output: &Path,
        progress_file: &Path,
        threads: usize,
    ) -> Self {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-progress".to_string(),
            progress_file.to_string_lossy().into_owned(),
            "-threads".to_string(),
            threads.to_string(),
        ];
        args.extend(backend.input_args.iter().cloned());
        for input in &graph.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }
        args.extend([
            "-filter_complex".to_string(),
            graph.filter_complex.clone(),
            "-map".to_string(),
            graph.video_map.clone(),
            "-map".to_string(),
            graph.audio_map.clone(),
        ]);
        args.extend(backend.codec_args.iter().cloned());
        args.extend(
            ["-c:a", "aac", "-b:a", "192k", "-movflags", "+faststart"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push("-t".to_string());
        args.push(format!("{:.3}", graph.duration));
        args.push(output.to_string_lossy().into_owned());

        Self {
            backend: backend.name.clone(),
            args,
            output: output.to_path_buf(),
            progress_file: progress_file.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FailureReason {
    #[error("exited with status {0:?}")]
    Exit(Option<i32>),
    #[error("could not be started: {0}")]
    Spawn(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("produced no output file")]
    EmptyOutput,
}

/// One backend attempt that did not produce a video.
#[derive(Debug, Clone, thiserror::Error)]
#[error("backend '{backend}' {reason}")]
pub struct BackendFailure {
    pub backend: String,
    pub reason: FailureReason,
    /// Tail of the encoder's stderr.
    pub diagnostics: String,
}

/// External media operations the render pipeline drives.
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Crop `source` to `width:height` keeping its height, dropping audio.
    async fn crop_background(
        &self,
        source: &Path,
        dest: &Path,
        width: u32,
        height: u32,
    ) -> RenderResult<()>;

    /// Stream-copy concatenation of the clips named in a concat list.
    async fn concat_audio(&self, list_file: &Path, dest: &Path) -> RenderResult<()>;

    async fn probe_duration(&self, path: &Path) -> RenderResult<f64>;

    async fn encode(
        &self,
        invocation: &EncodeInvocation,
        timeout: Duration,
    ) -> Result<(), BackendFailure>;

    /// Whether the host can run `backend` at all.
    fn backend_available(&self, backend: &BackendConfig) -> bool {
        backend.device.as_ref().is_none_or(|device| device.exists())
    }
}

pub fn encode_threads() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cpus.saturating_sub(1).clamp(1, 16)
}

/// ffmpeg / ffprobe on `PATH`.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    threads: usize,
    /// Program run for encodes; `ffmpeg` unless overridden.
    encoder_program: String,
}

impl FfmpegTools {
    pub fn new() -> Self {
        Self {
            threads: encode_threads(),
            encoder_program: "ffmpeg".to_string(),
        }
    }

    pub fn with_encoder_program(mut self, program: impl Into<String>) -> Self {
        self.encoder_program = program.into();
        self
    }
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_tool(stage: &'static str, program: &str, args: &[String]) -> RenderResult<Vec<u8>> {
    debug!(stage, ?args, "Running {}", program);
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| RenderError::tool(stage, format!("failed to start {program}: {e}")))?;
    if !output.status.success() {
        return Err(RenderError::tool(
            stage,
            format!(
                "{program} exited with {}: {}",
                output.status,
                stderr_tail(&String::from_utf8_lossy(&output.stderr))
            ),
        ));
    }
    Ok(output.stdout)
}

#[async_trait]
impl MediaTools for FfmpegTools {
    async fn crop_background(
        &self,
        source: &Path,
        dest: &Path,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        let args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("crop=ih*({width}/{height}):ih"),
            "-an".to_string(),
            "-c:v".to_string(),
            "h264".to_string(),
            "-b:v".to_string(),
            "20M".to_string(),
            "-threads".to_string(),
            self.threads.to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        run_tool("background preparation", "ffmpeg", &args).await?;
        Ok(())
    }

    async fn concat_audio(&self, list_file: &Path, dest: &Path) -> RenderResult<()> {
        let args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list_file.to_string_lossy().into_owned(),
            "-c".to_string(),
            "copy".to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        run_tool("audio concatenation", "ffmpeg", &args).await?;
        Ok(())
    }

    async fn probe_duration(&self, path: &Path) -> RenderResult<f64> {
        if !path.exists() {
            return Err(RenderError::probe(path, "file does not exist"));
        }
        let is_wav = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
        if is_wav {
            return wav_duration_seconds(path).map_err(|e| RenderError::probe(path, e));
        }

        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let stdout = run_tool("ffprobe", "ffprobe", &args)
            .await
            .map_err(|e| RenderError::probe(path, e))?;
        String::from_utf8_lossy(&stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| RenderError::probe(path, format!("unparseable duration: {e}")))
    }

    async fn encode(
        &self,
        invocation: &EncodeInvocation,
        timeout: Duration,
    ) -> Result<(), BackendFailure> {
        let failure = |reason: FailureReason, diagnostics: String| BackendFailure {
            backend: invocation.backend.clone(),
            reason,
            diagnostics,
        };

        debug!(backend = %invocation.backend, args = ?invocation.args, "Running {}", self.encoder_program);
        let mut child = Command::new(&self.encoder_program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failure(FailureReason::Spawn(e.to_string()), String::new()))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(failure(FailureReason::Spawn(e.to_string()), String::new()));
            }
            Err(_) => {
                warn!(backend = %invocation.backend, "Encode timed out after {:?}; killing ffmpeg", timeout);
                let _ = child.kill().await;
                let stderr = tokio::time::timeout(STDERR_GRACE, stderr_task)
                    .await
                    .ok()
                    .and_then(|r| r.ok())
                    .unwrap_or_default();
                return Err(failure(FailureReason::Timeout(timeout), stderr_tail(&stderr)));
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if status.success() {
            Ok(())
        } else {
            Err(failure(FailureReason::Exit(status.code()), stderr_tail(&stderr)))
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    lines[start..].join("\n")
}

/// Result of a successful encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutcome {
    pub backend: String,
    /// Position of the backend in the configured chain.
    pub backend_index: usize,
    /// Outer attempt (1-based) that succeeded.
    pub attempt: u32,
    pub output: PathBuf,
}

/// Walks the backend chain against one composition.
pub struct EncoderSelector<'a, M: MediaTools> {
    tools: &'a M,
    config: &'a EncoderConfig,
    threads: usize,
}

impl<'a, M: MediaTools> EncoderSelector<'a, M> {
    pub fn new(tools: &'a M, config: &'a EncoderConfig) -> Self {
        Self {
            tools,
            config,
            threads: encode_threads(),
        }
    }

    /// Render `composition` to `output`.
    ///
    /// Each backend is tried once per outer attempt; a failure moves straight
    /// to the next backend. After a full pass fails the chain is retried, up
    /// to `max_retries` passes with a backoff in between.
    pub async fn encode(
        &self,
        composition: &Composition,
        audio: AudioVariant,
        output: &Path,
        progress_file: &Path,
        declared_length: f64,
        on_progress: ProgressCallback,
    ) -> RenderResult<EncodeOutcome> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let max_retries = self.config.max_retries.max(1);
        let mut last_failure: Option<BackendFailure> = None;

        for attempt in 1..=max_retries {
            for (index, backend) in self.config.backends.iter().enumerate() {
                if !self.tools.backend_available(backend) {
                    info!(backend = %backend.name, "Backend device not present; skipping");
                    continue;
                }
                info!(backend = %backend.name, attempt, "Encoding {}", output.display());

                let graph = composition.graph(&backend.filter, audio);
                let invocation =
                    EncodeInvocation::new(backend, &graph, output, progress_file, self.threads);
                reset_file(progress_file).await;
                let _ = tokio::fs::remove_file(output).await;

                let monitor = ProgressMonitor::start(
                    progress_file.to_path_buf(),
                    declared_length,
                    on_progress.clone(),
                );
                let result = self.tools.encode(&invocation, timeout).await;
                monitor.stop().await;

                let result = match result {
                    Ok(()) => verify_output(&invocation),
                    Err(failure) => Err(failure),
                };
                match result {
                    Ok(()) => {
                        info!(backend = %backend.name, attempt, "Encode succeeded");
                        return Ok(EncodeOutcome {
                            backend: backend.name.clone(),
                            backend_index: index,
                            attempt,
                            output: output.to_path_buf(),
                        });
                    }
                    Err(failure) => {
                        warn!(
                            backend = %failure.backend,
                            attempt,
                            "{}; diagnostics: {}",
                            failure,
                            failure.diagnostics
                        );
                        last_failure = Some(failure);
                    }
                }
            }

            if attempt < max_retries {
                warn!("All encoder backends failed on attempt {attempt}/{max_retries}; retrying");
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            }
        }

        let (backend, diagnostics) = match last_failure {
            Some(failure) => {
                let detail = if failure.diagnostics.is_empty() {
                    failure.reason.to_string()
                } else {
                    format!("{}\n{}", failure.reason, failure.diagnostics)
                };
                (failure.backend, detail)
            }
            None => (
                "none".to_string(),
                "no encoder backend is available on this host".to_string(),
            ),
        };
        Err(RenderError::EncodeExhausted {
            attempts: max_retries,
            backend,
            diagnostics,
        })
    }
}

async fn reset_file(path: &Path) {
    if let Err(e) = tokio::fs::write(path, b"").await {
        warn!("Could not reset progress file {}: {}", path.display(), e);
    }
}

fn verify_output(invocation: &EncodeInvocation) -> Result<(), BackendFailure> {
    let len = std::fs::metadata(&invocation.output)
        .map(|m| m.len())
        .unwrap_or(0);
    if len > 0 {
        Ok(())
    } else {
        Err(BackendFailure {
            backend: invocation.backend.clone(),
            reason: FailureReason::EmptyOutput,
            diagnostics: String::new(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use crate::compositor::Watermark;
    use crate::timing::Timeline;

    /// Scripted stand-in for ffmpeg: backends named in `failing` fail,
    /// everything else writes a small output file.
    #[derive(Default)]
    pub(crate) struct FakeTools {
        pub failing: Vec<String>,
        pub timing_out: Vec<String>,
        pub durations: HashMap<String, f64>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeTools {
        pub fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn encode_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaTools for FakeTools {
        async fn crop_background(&self, _: &Path, dest: &Path, _: u32, _: u32) -> RenderResult<()> {
            std::fs::write(dest, b"video")?;
            Ok(())
        }

        async fn concat_audio(&self, _: &Path, dest: &Path) -> RenderResult<()> {
            std::fs::write(dest, b"audio")?;
            Ok(())
        }

        async fn probe_duration(&self, path: &Path) -> RenderResult<f64> {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            self.durations
                .get(&name)
                .copied()
                .ok_or_else(|| RenderError::probe(path, "unknown clip"))
        }

        async fn encode(&self, invocation: &EncodeInvocation, _: Duration) -> Result<(), BackendFailure> {
            self.calls.lock().unwrap().push(invocation.backend.clone());
            std::fs::write(&invocation.progress_file, "out_time_ms=1000000\nprogress=end\n").unwrap();
            if self.timing_out.contains(&invocation.backend) {
                return Err(BackendFailure {
                    backend: invocation.backend.clone(),
                    reason: FailureReason::Timeout(Duration::from_secs(5)),
                    diagnostics: String::new(),
                });
            }
            if self.failing.contains(&invocation.backend) {
                return Err(BackendFailure {
                    backend: invocation.backend.clone(),
                    reason: FailureReason::Exit(Some(1)),
                    diagnostics: format!("{} exploded", invocation.backend),
                });
            }
            std::fs::write(&invocation.output, b"mp4").unwrap();
            Ok(())
        }

        fn backend_available(&self, _: &BackendConfig) -> bool {
            true
        }
    }

    fn chain(names: &[&str]) -> EncoderConfig {
        EncoderConfig {
            max_retries: 3,
            retry_backoff_ms: 0,
            timeout_secs: 5,
            backends: names
                .iter()
                .map(|name| BackendConfig {
                    name: name.to_string(),
                    device: None,
                    input_args: Vec::new(),
                    filter: FilterProfile::Software,
                    codec_args: args(&["-c:v", "libx264"]),
                })
                .collect(),
        }
    }

    fn composition() -> Composition {
        let timeline = Timeline::from_durations(&[1.0]).unwrap();
        Composition {
            width: 1080,
            height: 1920,
            opacity: 1.0,
            background: PathBuf::from("bg.mp4"),
            title_card: PathBuf::from("title.png"),
            title_interval: *timeline.get(0).unwrap(),
            overlays: Vec::new(),
            narration: PathBuf::from("audio.wav"),
            background_audio: None,
            watermark: Watermark {
                text: String::new(),
                font_file: PathBuf::from("font.ttf"),
            },
            length: timeline.total(),
        }
    }

    #[test]
    fn default_chain_ends_in_software() {
        let chain = default_backends();
        let names: Vec<_> = chain.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, ["qsv", "vaapi", "vaapi-simplified", "software"]);
        assert_eq!(chain[3].filter, FilterProfile::Software);
        assert!(chain[3].device.is_none());
    }

    #[test]
    fn invocation_orders_arguments() {
        let backend = &default_backends()[1];
        let graph = composition().graph(&backend.filter, AudioVariant::Mixed);
        let inv = EncodeInvocation::new(backend, &graph, Path::new("out.mp4"), Path::new("p.txt"), 4);
        let a = &inv.args;
        let pos = |s: &str| a.iter().position(|x| x == s).unwrap();
        assert_eq!(&a[..6], ["-y", "-nostdin", "-progress", "p.txt", "-threads", "4"]);
        assert!(pos("-vaapi_device") < pos("-i"));
        assert!(pos("-filter_complex") < pos("h264_vaapi"));
        assert_eq!(a[pos("-map") + 1], "[v]");
        assert_eq!(a.last().unwrap(), "out.mp4");
    }

    #[test]
    fn output_is_cut_at_narration_length() {
        let timeline = Timeline::from_durations(&[3.2, 4.0, 2.8]).unwrap();
        let mut c = composition();
        c.length = timeline.total();
        c.background_audio = crate::compositor::BackgroundAudio::new(PathBuf::from("bg.mp3"), 0.15);
        let backend = &default_backends()[3];
        let graph = c.graph(&backend.filter, AudioVariant::Mixed);
        let inv = EncodeInvocation::new(backend, &graph, Path::new("out.mp4"), Path::new("p.txt"), 2);

        let a = &inv.args;
        let t = a.iter().position(|x| x == "-t").expect("duration bound");
        assert_eq!(a[t + 1], "10.000");
        assert_eq!(t + 2, a.len() - 1);
        assert!(graph.filter_complex.contains("amix=inputs=2"));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&text);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[tokio::test]
    async fn falls_back_until_software_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakeTools::failing(&["qsv", "vaapi"]);
        let config = chain(&["qsv", "vaapi", "software"]);
        let selector = EncoderSelector::new(&tools, &config);
        let output = dir.path().join("out.mp4");

        let outcome = selector
            .encode(
                &composition(),
                AudioVariant::Mixed,
                &output,
                &dir.path().join("progress.txt"),
                10.0,
                Arc::new(|_| {}),
            )
            .await
            .unwrap();

        assert_eq!(outcome.backend, "software");
        assert_eq!(outcome.backend_index, 2);
        assert_eq!(outcome.attempt, 1);
        assert_eq!(tools.encode_calls(), ["qsv", "vaapi", "software"]);
        assert!(std::fs::metadata(&output).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn timed_out_backend_falls_through_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakeTools {
            timing_out: vec!["qsv".to_string()],
            ..FakeTools::default()
        };
        let config = chain(&["qsv", "software"]);
        let outcome = EncoderSelector::new(&tools, &config)
            .encode(
                &composition(),
                AudioVariant::Mixed,
                &dir.path().join("out.mp4"),
                &dir.path().join("progress.txt"),
                1.0,
                Arc::new(|_| {}),
            )
            .await
            .unwrap();
        assert_eq!(outcome.backend, "software");
        assert_eq!(outcome.backend_index, 1);
        assert_eq!(tools.encode_calls(), ["qsv", "software"]);
    }

    fn shell_invocation(dir: &Path, script: &str) -> EncodeInvocation {
        EncodeInvocation {
            backend: "software".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            output: dir.join("out.mp4"),
            progress_file: dir.join("progress.txt"),
        }
    }

    #[tokio::test]
    async fn hung_encoder_is_killed_at_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FfmpegTools::new().with_encoder_program("sh");
        let started = std::time::Instant::now();
        let failure = tools
            .encode(&shell_invocation(dir.path(), "exec sleep 30"), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::Timeout(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_stderr_tail() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FfmpegTools::new().with_encoder_program("sh");
        let failure = tools
            .encode(&shell_invocation(dir.path(), "echo boom >&2; exit 3"), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(failure.reason, FailureReason::Exit(Some(3)));
        assert!(failure.diagnostics.contains("boom"));
    }

    #[tokio::test]
    async fn exhausting_every_retry_reports_last_backend() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakeTools::failing(&["qsv", "vaapi", "software"]);
        let config = chain(&["qsv", "vaapi", "software"]);
        let selector = EncoderSelector::new(&tools, &config);

        let err = selector
            .encode(
                &composition(),
                AudioVariant::Mixed,
                &dir.path().join("out.mp4"),
                &dir.path().join("progress.txt"),
                10.0,
                Arc::new(|_| {}),
            )
            .await
            .unwrap_err();

        match err {
            RenderError::EncodeExhausted { attempts, backend, diagnostics } => {
                assert_eq!(attempts, 3);
                assert_eq!(backend, "software");
                assert!(diagnostics.contains("software exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(tools.encode_calls().len(), 9);
    }

    #[tokio::test]
    async fn zero_exit_without_output_is_a_failure() {
        struct Silent;

        #[async_trait]
        impl MediaTools for Silent {
            async fn crop_background(&self, _: &Path, _: &Path, _: u32, _: u32) -> RenderResult<()> {
                Ok(())
            }
            async fn concat_audio(&self, _: &Path, _: &Path) -> RenderResult<()> {
                Ok(())
            }
            async fn probe_duration(&self, _: &Path) -> RenderResult<f64> {
                Ok(1.0)
            }
            async fn encode(&self, _: &EncodeInvocation, _: Duration) -> Result<(), BackendFailure> {
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut config = chain(&["software"]);
        config.max_retries = 1;
        let err = EncoderSelector::new(&Silent, &config)
            .encode(
                &composition(),
                AudioVariant::Mixed,
                &dir.path().join("out.mp4"),
                &dir.path().join("progress.txt"),
                1.0,
                Arc::new(|_| {}),
            )
            .await
            .unwrap_err();
        match err {
            RenderError::EncodeExhausted { diagnostics, .. } => {
                assert!(diagnostics.contains("no output file"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_devices_are_skipped() {
        struct NoDevices(FakeTools);

        #[async_trait]
        impl MediaTools for NoDevices {
            async fn crop_background(&self, s: &Path, d: &Path, w: u32, h: u32) -> RenderResult<()> {
                self.0.crop_background(s, d, w, h).await
            }
            async fn concat_audio(&self, l: &Path, d: &Path) -> RenderResult<()> {
                self.0.concat_audio(l, d).await
            }
            async fn probe_duration(&self, p: &Path) -> RenderResult<f64> {
                self.0.probe_duration(p).await
            }
            async fn encode(&self, i: &EncodeInvocation, t: Duration) -> Result<(), BackendFailure> {
                self.0.encode(i, t).await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let tools = NoDevices(FakeTools::default());
        let mut config = chain(&["software"]);
        config.backends.insert(
            0,
            BackendConfig {
                device: Some(dir.path().join("no-such-device")),
                ..default_backends()[0].clone()
            },
        );
        let outcome = EncoderSelector::new(&tools, &config)
            .encode(
                &composition(),
                AudioVariant::Mixed,
                &dir.path().join("out.mp4"),
                &dir.path().join("progress.txt"),
                1.0,
                Arc::new(|_| {}),
            )
            .await
            .unwrap();
        assert_eq!(outcome.backend_index, 1);
        assert_eq!(tools.0.encode_calls(), ["software"]);
    }
}
