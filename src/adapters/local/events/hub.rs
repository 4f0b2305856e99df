use crate::ports::events::{ProgressEventSink, VideoProcessingEvent, VIDEO_PROCESSING_EVENT};
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast sink for [`VideoProcessingEvent`]s.
///
/// Publishing never blocks: slow subscribers lag and miss events instead.
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<VideoProcessingEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: VideoProcessingEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VideoProcessingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        // Capacity of 100 events should be sufficient for now
        Self::new(100)
    }
}

impl ProgressEventSink for EventHub {
    fn emit(&self, event: VideoProcessingEvent) {
        trace!(
            event = VIDEO_PROCESSING_EVENT,
            video_id = %event.video_id,
            progress = event.progress,
            status = ?event.status,
            "Publishing event"
        );
        self.publish(event);
    }
}
