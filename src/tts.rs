use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::TtsConfig;

/// Piper text-to-speech, one WAV file per call.
pub struct PiperNarrator {
    model: PathBuf,
    max_chars: usize,
}

impl PiperNarrator {
    pub fn new(model: impl Into<PathBuf>, max_chars: usize) -> Self {
        Self {
            model: model.into(),
            max_chars,
        }
    }

    pub fn from_config(config: &TtsConfig) -> Self {
        Self::new(config.piper_model.clone(), config.max_chars)
    }

    /// Reject text piper should not be asked to speak in one call.
    pub fn check_budget(&self, text: &str) -> anyhow::Result<()> {
        let len = text.chars().count();
        if text.trim().is_empty() {
            anyhow::bail!("Refusing to narrate empty text");
        }
        if len > self.max_chars {
            anyhow::bail!(
                "Text of {} chars exceeds the narrator budget of {} chars",
                len,
                self.max_chars
            );
        }
        Ok(())
    }

    pub async fn narrate(&self, text: &str, out_path: &Path) -> anyhow::Result<()> {
        self.check_budget(text)?;
        debug!("Calling Piper TTS for output file {}", out_path.display());

        let mut child = Command::new("piper")
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(out_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to spawn piper process")?;

        {
            let mut stdin = child.stdin.take().context("Failed to open piper stdin")?;
            stdin.write_all(text.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if !status.success() {
            error!("Piper TTS command failed for {}", out_path.display());
            anyhow::bail!("TTS engine failed for {}, command returned {}", out_path.display(), status);
        }
        info!("Narrated {} chars into {}", text.chars().count(), out_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_rejects_long_and_empty_text() {
        let narrator = PiperNarrator::new("model.onnx", 10);
        assert!(narrator.check_budget("short one").is_ok());
        assert!(narrator.check_budget("ümlautsüüü").is_ok());
        let err = narrator.check_budget("this is way past ten").unwrap_err();
        assert!(err.to_string().contains("budget of 10"));
        assert!(narrator.check_budget("   ").is_err());
    }

    #[tokio::test]
    async fn over_budget_text_never_spawns_piper() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("0.wav");
        let narrator = PiperNarrator::new("model.onnx", 3);
        assert!(narrator.narrate("too long", &out).await.is_err());
        assert!(!out.exists());
    }
}
