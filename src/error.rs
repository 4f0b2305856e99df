//! Error types for the processing pipeline.

use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while ingesting and transcoding a video.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Probe failed: {message}")]
    Probe {
        message: String,
        stderr: Option<String>,
    },

    #[error("Transcode failed: {message}")]
    Transcode {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("Processing aborted")]
    Aborted,

    #[error("Processing timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn probe(message: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Probe {
            message: message.into(),
            stderr,
        }
    }

    pub fn transcode(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::Transcode {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    /// True for the cancellation outcome, which is not a processing failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Message recorded against the video when the job fails.
    ///
    /// Tool diagnostics are appended so operators see why ffmpeg refused the input.
    pub fn detailed_message(&self) -> String {
        match self {
            Self::Probe {
                stderr: Some(stderr),
                ..
            }
            | Self::Transcode {
                stderr: Some(stderr),
                ..
            } if !stderr.trim().is_empty() => format!("{}: {}", self, stderr.trim()),
            _ => self.to_string(),
        }
    }
}
