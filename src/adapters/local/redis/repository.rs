//! Redis ProcessingRepository implementation.

use super::error::RepositoryError;
use super::pool::RedisPool;
use super::{FIELD_ERROR, FIELD_IS_PROCESSED, FIELD_PROGRESS, FIELD_SOURCE, KEY_PREFIX};
use crate::domain::jobs::{Namespace, SourceHandle};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::repository::{
    IncompleteVideo, ProcessingRepository, ProcessingStatusUpdate, VideoRegistry, VideoStatus,
};
use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RedisRepository {
    pool: RedisPool,
    namespace: Namespace,
}

impl RedisRepository {
    pub fn new(pool: RedisPool, namespace: Namespace) -> Self {
        Self { pool, namespace }
    }

    fn video_key(&self, video_id: &str) -> String {
        format!("{}:{}:video:{}", KEY_PREFIX, self.namespace, video_id)
    }

    fn pending_key(&self) -> String {
        format!("{}:{}:pending", KEY_PREFIX, self.namespace)
    }
}

#[async_trait]
impl VideoRegistry for RedisRepository {
    async fn register_video(&self, video_id: &str, source: &SourceHandle) -> PipelineResult<()> {
        if matches!(source, SourceHandle::Memory { .. }) {
            return Err(PipelineError::invalid_input(
                "in-memory sources cannot be persisted",
            ));
        }
        let key = self.video_key(video_id);
        let source = serde_json::to_string(source)?;
        let mut conn = self.pool.get().await?;

        let (): () = redis::pipe()
            .atomic()
            .hset(&key, FIELD_SOURCE, source)
            .ignore()
            .hset(&key, FIELD_IS_PROCESSED, 0)
            .ignore()
            .hset(&key, FIELD_PROGRESS, 0)
            .ignore()
            .hdel(&key, FIELD_ERROR)
            .ignore()
            .sadd(self.pending_key(), video_id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(RepositoryError::from)?;

        debug!(video_id, key = %key, "Registered video");
        Ok(())
    }

    async fn video_status(&self, video_id: &str) -> PipelineResult<VideoStatus> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.video_key(video_id))
            .await
            .map_err(RepositoryError::from)?;
        status_from_fields(&fields)
            .ok_or_else(|| PipelineError::not_found(format!("video {}", video_id)))
    }
}

#[async_trait]
impl ProcessingRepository for RedisRepository {
    async fn find_incomplete_videos(&self) -> PipelineResult<Vec<IncompleteVideo>> {
        let mut conn = self.pool.get().await?;
        let mut ids: Vec<String> = conn
            .smembers(self.pending_key())
            .await
            .map_err(RepositoryError::from)?;
        ids.sort();

        let mut videos = Vec::with_capacity(ids.len());
        for id in ids {
            let fields: HashMap<String, String> = conn
                .hgetall(self.video_key(&id))
                .await
                .map_err(RepositoryError::from)?;
            match incomplete_from_fields(&id, &fields) {
                Some(video) => videos.push(video),
                None => warn!(video_id = %id, "Pending video has no incomplete record"),
            }
        }
        Ok(videos)
    }

    async fn get_video_file_path(&self, video_id: &str) -> PipelineResult<SourceHandle> {
        let mut conn = self.pool.get().await?;
        let source: Option<String> = conn
            .hget(self.video_key(video_id), FIELD_SOURCE)
            .await
            .map_err(RepositoryError::from)?;
        let source =
            source.ok_or_else(|| PipelineError::not_found(format!("video {}", video_id)))?;
        Ok(serde_json::from_str(&source)?)
    }

    async fn update_video_processing_status(
        &self,
        video_id: &str,
        update: ProcessingStatusUpdate,
    ) -> PipelineResult<()> {
        let key = self.video_key(video_id);
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(&key).await.map_err(RepositoryError::from)?;
        if !exists {
            return Err(PipelineError::not_found(format!("video {}", video_id)));
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(is_processed) = update.is_processed {
            pipe.hset(&key, FIELD_IS_PROCESSED, i64::from(is_processed))
                .ignore();
            if is_processed {
                pipe.srem(self.pending_key(), video_id).ignore();
            } else {
                pipe.sadd(self.pending_key(), video_id).ignore();
            }
        }
        if let Some(progress) = update.processing_progress {
            pipe.hset(&key, FIELD_PROGRESS, i64::from(progress)).ignore();
        }
        match update.processing_error {
            Some(Some(message)) => {
                pipe.hset(&key, FIELD_ERROR, message).ignore();
            }
            Some(None) => {
                pipe.hdel(&key, FIELD_ERROR).ignore();
            }
            None => {}
        }

        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(RepositoryError::from)?;
        Ok(())
    }
}

fn status_from_fields(fields: &HashMap<String, String>) -> Option<VideoStatus> {
    if fields.is_empty() {
        return None;
    }
    Some(VideoStatus {
        is_processed: fields
            .get(FIELD_IS_PROCESSED)
            .is_some_and(|v| v == "1" || v == "true"),
        processing_progress: fields
            .get(FIELD_PROGRESS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        processing_error: fields.get(FIELD_ERROR).cloned(),
    })
}

fn incomplete_from_fields(id: &str, fields: &HashMap<String, String>) -> Option<IncompleteVideo> {
    let status = status_from_fields(fields).filter(|status| !status.is_processed)?;
    Some(IncompleteVideo {
        id: id.to_string(),
        is_processed: status.is_processed,
        processing_progress: status.processing_progress,
        processing_error: status.processing_error,
    })
}
