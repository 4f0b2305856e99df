//! In-memory [`ProcessingRepository`], used by tests and single-process setups.

use crate::domain::jobs::SourceHandle;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::repository::{
    IncompleteVideo, ProcessingRepository, ProcessingStatusUpdate, VideoRegistry, VideoStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Persisted state of one video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub source: SourceHandle,
    pub is_processed: bool,
    pub processing_progress: u8,
    pub processing_error: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    videos: HashMap<String, VideoRecord>,
    // registration order, so resumption is deterministic
    order: Vec<String>,
    history: Vec<(String, ProcessingStatusUpdate)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or re-register) a video as unprocessed.
    pub fn register_video(&self, video_id: impl Into<String>, source: SourceHandle) {
        let video_id = video_id.into();
        let mut inner = self.lock();
        if !inner.videos.contains_key(&video_id) {
            inner.order.push(video_id.clone());
        }
        inner.videos.insert(
            video_id,
            VideoRecord {
                source,
                is_processed: false,
                processing_progress: 0,
                processing_error: None,
            },
        );
    }

    /// Seed a record directly, e.g. one left behind by a crashed run.
    pub fn insert_record(&self, video_id: impl Into<String>, record: VideoRecord) {
        let video_id = video_id.into();
        let mut inner = self.lock();
        if !inner.videos.contains_key(&video_id) {
            inner.order.push(video_id.clone());
        }
        inner.videos.insert(video_id, record);
    }

    pub fn record(&self, video_id: &str) -> Option<VideoRecord> {
        self.lock().videos.get(video_id).cloned()
    }

    /// Every status update applied so far, oldest first.
    pub fn history(&self) -> Vec<(String, ProcessingStatusUpdate)> {
        self.lock().history.clone()
    }

    pub fn history_for(&self, video_id: &str) -> Vec<ProcessingStatusUpdate> {
        self.lock()
            .history
            .iter()
            .filter(|(id, _)| id == video_id)
            .map(|(_, update)| update.clone())
            .collect()
    }
}

#[async_trait]
impl ProcessingRepository for MemoryRepository {
    async fn find_incomplete_videos(&self) -> PipelineResult<Vec<IncompleteVideo>> {
        let inner = self.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.videos.get(id).map(|record| (id, record)))
            .filter(|(_, record)| !record.is_processed)
            .map(|(id, record)| IncompleteVideo {
                id: id.clone(),
                is_processed: record.is_processed,
                processing_progress: record.processing_progress,
                processing_error: record.processing_error.clone(),
            })
            .collect())
    }

    async fn get_video_file_path(&self, video_id: &str) -> PipelineResult<SourceHandle> {
        self.lock()
            .videos
            .get(video_id)
            .map(|record| record.source.clone())
            .ok_or_else(|| PipelineError::not_found(format!("video {}", video_id)))
    }

    async fn update_video_processing_status(
        &self,
        video_id: &str,
        update: ProcessingStatusUpdate,
    ) -> PipelineResult<()> {
        let mut inner = self.lock();
        let record = inner
            .videos
            .get_mut(video_id)
            .ok_or_else(|| PipelineError::not_found(format!("video {}", video_id)))?;

        if let Some(is_processed) = update.is_processed {
            record.is_processed = is_processed;
        }
        if let Some(progress) = update.processing_progress {
            record.processing_progress = progress;
        }
        if let Some(error) = &update.processing_error {
            record.processing_error = error.clone();
        }
        inner.history.push((video_id.to_string(), update));
        Ok(())
    }
}

#[async_trait]
impl VideoRegistry for MemoryRepository {
    async fn register_video(&self, video_id: &str, source: &SourceHandle) -> PipelineResult<()> {
        MemoryRepository::register_video(self, video_id, source.clone());
        Ok(())
    }

    async fn video_status(&self, video_id: &str) -> PipelineResult<VideoStatus> {
        self.record(video_id)
            .map(|record| VideoStatus {
                is_processed: record.is_processed,
                processing_progress: record.processing_progress,
                processing_error: record.processing_error,
            })
            .ok_or_else(|| PipelineError::not_found(format!("video {}", video_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> SourceHandle {
        SourceHandle::Local(PathBuf::from("/uploads/a.mp4"))
    }

    #[tokio::test]
    async fn test_incomplete_videos_in_registration_order() {
        let repo = MemoryRepository::new();
        repo.register_video("b", source());
        repo.register_video("a", source());
        repo.register_video("c", source());
        repo.update_video_processing_status("a", ProcessingStatusUpdate::completed())
            .await
            .unwrap();

        let ids: Vec<String> = repo
            .find_incomplete_videos()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_video_status_follows_updates() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.video_status("v1").await,
            Err(PipelineError::NotFound(_))
        ));

        repo.register_video("v1", source());
        repo.update_video_processing_status("v1", ProcessingStatusUpdate::progress(40))
            .await
            .unwrap();
        repo.update_video_processing_status("v1", ProcessingStatusUpdate::failed("boom"))
            .await
            .unwrap();

        let status = repo.video_status("v1").await.unwrap();
        assert!(!status.is_processed);
        assert_eq!(status.processing_progress, 40);
        assert_eq!(status.processing_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_progress() {
        let repo = MemoryRepository::new();
        repo.register_video("v1", source());
        repo.update_video_processing_status("v1", ProcessingStatusUpdate::progress(60))
            .await
            .unwrap();
        repo.update_video_processing_status("v1", ProcessingStatusUpdate::failed("bad input"))
            .await
            .unwrap();

        let record = repo.record("v1").unwrap();
        assert_eq!(record.processing_progress, 60);
        assert_eq!(record.processing_error.as_deref(), Some("bad input"));
        assert!(!record.is_processed);

        repo.update_video_processing_status("v1", ProcessingStatusUpdate::started())
            .await
            .unwrap();
        assert_eq!(repo.record("v1").unwrap().processing_error, None);
        assert_eq!(repo.history_for("v1").len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_video_is_not_found() {
        let repo = MemoryRepository::new();
        assert!(matches!(
            repo.get_video_file_path("nope").await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            repo.update_video_processing_status("nope", ProcessingStatusUpdate::completed())
                .await,
            Err(PipelineError::NotFound(_))
        ));
    }
}
