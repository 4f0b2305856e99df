use crate::domain::av::probe::ProbeResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name under which progress events are published.
pub const VIDEO_PROCESSING_EVENT: &str = "videoProcessing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoProcessingEvent {
    pub video_id: String,
    pub progress: u8,
    pub status: EventStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProbeResult>,
    pub timestamp: DateTime<Utc>,
}

impl VideoProcessingEvent {
    pub fn new(
        video_id: impl Into<String>,
        progress: u8,
        status: EventStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            progress,
            status,
            message: message.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: ProbeResult) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Publishes progress to subscribers. Must not block.
pub trait ProgressEventSink: Send + Sync {
    fn emit(&self, event: VideoProcessingEvent);
}

impl<T: ProgressEventSink + ?Sized> ProgressEventSink for std::sync::Arc<T> {
    fn emit(&self, event: VideoProcessingEvent) {
        (**self).emit(event)
    }
}
