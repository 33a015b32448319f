//! Encoder progress: a pure parser for ffmpeg `-progress` output and a
//! background task that polls the side-channel file while an encode runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Receives the completed fraction of the job, in `0.0..=1.0`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Latest elapsed output time, in seconds, reported in `lines`.
///
/// Scans from the end. Understands `out_time_ms=<µs>`, `out_time_us=<µs>`,
/// `out_time=HH:MM:SS.mmm` and stats lines like `time=00:00:05.00 bitrate=...`.
/// Malformed or partial lines are skipped.
pub fn latest_elapsed_secs<'a, I>(lines: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: DoubleEndedIterator,
{
    lines.into_iter().rev().find_map(parse_line)
}

fn parse_line(line: &str) -> Option<f64> {
    let line = line.trim();
    // ffmpeg writes microseconds under both keys.
    if let Some(value) = line
        .strip_prefix("out_time_ms=")
        .or_else(|| line.strip_prefix("out_time_us="))
    {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        return value.parse::<f64>().ok().map(|us| us / 1_000_000.0);
    }
    if let Some(value) = line.strip_prefix("out_time=") {
        return parse_timestamp(value.trim());
    }
    if line.contains("bitrate=") {
        let (_, rest) = line.split_once("time=")?;
        return parse_timestamp(rest.split_whitespace().next()?);
    }
    None
}

/// `HH:MM:SS.mmm` to seconds.
fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Turns elapsed seconds into a non-decreasing fraction of the declared length.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    declared_length: f64,
    fraction: f64,
}

impl ProgressTracker {
    pub fn new(declared_length: f64) -> Self {
        Self {
            declared_length,
            fraction: 0.0,
        }
    }

    /// Fold the latest reading in. Returns the new fraction when it advanced.
    pub fn observe(&mut self, elapsed_secs: f64) -> Option<f64> {
        if self.declared_length <= 0.0 || !elapsed_secs.is_finite() {
            return None;
        }
        let fraction = (elapsed_secs / self.declared_length).clamp(0.0, 1.0);
        if fraction > self.fraction {
            self.fraction = fraction;
            Some(fraction)
        } else {
            None
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

/// Polls a progress file on a background task for the duration of one encode.
///
/// Stop it with [`ProgressMonitor::stop`]; dropping it also ends the task.
pub struct ProgressMonitor {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<f64>>,
}

impl ProgressMonitor {
    pub fn start(path: PathBuf, declared_length: f64, callback: ProgressCallback) -> Self {
        Self::start_with_interval(path, declared_length, callback, POLL_INTERVAL)
    }

    pub fn start_with_interval(
        path: PathBuf,
        declared_length: f64,
        callback: ProgressCallback,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut tracker = ProgressTracker::new(declared_length);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        poll_once(&path, &mut tracker, &callback).await;
                    }
                }
            }
            // Final read so a fast encode still reports its last marker.
            poll_once(&path, &mut tracker, &callback).await;
            tracker.fraction()
        });
        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop polling and wait for the task. Returns the last reported fraction.
    pub async fn stop(mut self) -> f64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or(0.0),
            None => 0.0,
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn poll_once(path: &Path, tracker: &mut ProgressTracker, callback: &ProgressCallback) {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            debug!("Progress file {} not readable yet: {}", path.display(), e);
            return;
        }
    };
    if let Some(elapsed) = latest_elapsed_secs(content.lines()) {
        if let Some(fraction) = tracker.observe(elapsed) {
            callback(fraction);
        }
    }
}
