//! Error types for the video assembly pipeline.

use std::path::PathBuf;

use serde::Serialize;

/// Fatal errors surfaced by a render job.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Missing required input files: {}", join_paths(.paths))]
    MissingInput { paths: Vec<PathBuf> },

    #[error("Could not determine duration of {}: {reason}", .path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("Nothing to render: the thread has no narrated comments")]
    NothingToRender,

    #[error("Required visual asset missing: {}", .path.display())]
    AssetMissing { path: PathBuf },

    #[error("Declared length {declared:.2}s disagrees with narration total {actual:.2}s")]
    LengthMismatch { declared: f64, actual: f64 },

    #[error("All encoder backends failed after {attempts} attempt(s); last backend '{backend}': {diagnostics}")]
    EncodeExhausted {
        attempts: u32,
        backend: String,
        diagnostics: String,
    },

    #[error("{stage} failed: {message}")]
    Tool { stage: &'static str, message: String },

    #[error("Font error: {0}")]
    Font(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingInput,
    Probe,
    NothingToRender,
    AssetMissing,
    LengthMismatch,
    EncodeExhausted,
    Tool,
    Asset,
    Config,
    Io,
    /// Content fetching or narration, before rendering started.
    Upstream,
}

/// User-visible failure: kind plus message, no raw process output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    /// Report for a failed run, classifying errors outside the render pipeline
    /// as upstream failures.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<RenderError>() {
            Some(render) => render.report(),
            None => Self {
                kind: ErrorKind::Upstream,
                message: format!("{err:#}"),
            },
        }
    }
}

impl RenderError {
    pub fn tool(stage: &'static str, msg: impl Into<String>) -> Self {
        Self::Tool {
            stage,
            message: msg.into(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingInput { .. } => ErrorKind::MissingInput,
            Self::Probe { .. } => ErrorKind::Probe,
            Self::NothingToRender => ErrorKind::NothingToRender,
            Self::AssetMissing { .. } => ErrorKind::AssetMissing,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::EncodeExhausted { .. } => ErrorKind::EncodeExhausted,
            Self::Tool { .. } => ErrorKind::Tool,
            Self::Font(_) | Self::Image(_) => ErrorKind::Asset,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) | Self::Json(_) => ErrorKind::Io,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_lists_every_path() {
        let err = RenderError::MissingInput {
            paths: vec![PathBuf::from("a/title.wav"), PathBuf::from("a/png/comment_0.png")],
        };
        let msg = err.to_string();
        assert!(msg.contains("a/title.wav"));
        assert!(msg.contains("a/png/comment_0.png"));
        assert_eq!(err.kind(), ErrorKind::MissingInput);
    }

    #[test]
    fn report_serializes_kind_in_snake_case() {
        let report = RenderError::NothingToRender.report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"kind\":\"nothing_to_render\""));
    }

    #[test]
    fn anyhow_reports_keep_render_kinds() {
        let render = anyhow::Error::from(RenderError::NothingToRender).context("rendering thread");
        assert_eq!(ErrorReport::from_anyhow(&render).kind, ErrorKind::NothingToRender);

        let upstream = anyhow::anyhow!("No suitable posts found in subreddit x");
        let report = ErrorReport::from_anyhow(&upstream);
        assert_eq!(report.kind, ErrorKind::Upstream);
        assert!(report.message.contains("No suitable posts"));
    }
}
