use crate::domain::jobs::SourceHandle;
use crate::error::PipelineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A video whose processing never completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteVideo {
    pub id: String,
    pub is_processed: bool,
    pub processing_progress: u8,
    pub processing_error: Option<String>,
}

/// Last recorded processing status of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoStatus {
    pub is_processed: bool,
    pub processing_progress: u8,
    pub processing_error: Option<String>,
}

/// Patch of the persisted processing status. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingStatusUpdate {
    pub is_processed: Option<bool>,
    pub processing_progress: Option<u8>,
    /// `Some(None)` clears a previously recorded error.
    pub processing_error: Option<Option<String>>,
}

impl ProcessingStatusUpdate {
    /// A fresh run: clears any previous error.
    pub fn started() -> Self {
        Self {
            is_processed: Some(false),
            processing_progress: Some(0),
            processing_error: Some(None),
        }
    }

    pub fn progress(percent: u8) -> Self {
        Self {
            processing_progress: Some(percent),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            is_processed: Some(true),
            processing_progress: Some(100),
            processing_error: Some(None),
        }
    }

    /// Progress is deliberately left at its last value.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            is_processed: Some(false),
            processing_error: Some(Some(message.into())),
            ..Default::default()
        }
    }

    /// Aborted runs stay incomplete without an error so they resume on restart.
    pub fn aborted() -> Self {
        Self {
            is_processed: Some(false),
            ..Default::default()
        }
    }
}

/// Persistence of per-video processing status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessingRepository: Send + Sync {
    async fn find_incomplete_videos(&self) -> PipelineResult<Vec<IncompleteVideo>>;

    async fn get_video_file_path(&self, video_id: &str) -> PipelineResult<SourceHandle>;

    async fn update_video_processing_status(
        &self,
        video_id: &str,
        update: ProcessingStatusUpdate,
    ) -> PipelineResult<()>;
}

/// Creation and lookup of the records uploads start from.
#[async_trait]
pub trait VideoRegistry: Send + Sync {
    /// Create (or reset) the record of `video_id` as unprocessed.
    async fn register_video(&self, video_id: &str, source: &SourceHandle) -> PipelineResult<()>;

    /// `NotFound` for unknown ids.
    async fn video_status(&self, video_id: &str) -> PipelineResult<VideoStatus>;
}
