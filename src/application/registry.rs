//! Registry of videos currently being processed in this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Running video ids mapped to the token that aborts them.
///
/// Processing the same id twice concurrently would race on its artifacts, so
/// hosts go through [`InFlightJobs::try_begin`] before starting a run.
#[derive(Debug, Clone, Default)]
pub struct InFlightJobs {
    jobs: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl InFlightJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `video_id`, or `None` when a run for it is already in flight.
    ///
    /// The ticket's token is a child of `parent`, so cancelling the parent
    /// aborts every job started from it.
    pub fn try_begin(&self, video_id: &str, parent: &CancellationToken) -> Option<JobTicket> {
        let mut jobs = self.lock();
        if jobs.contains_key(video_id) {
            return None;
        }
        let token = parent.child_token();
        jobs.insert(video_id.to_string(), token.clone());
        Some(JobTicket {
            video_id: video_id.to_string(),
            token,
            jobs: self.clone(),
        })
    }

    /// Returns false if nothing was running for `video_id`.
    pub fn cancel(&self, video_id: &str) -> bool {
        match self.lock().get(video_id) {
            Some(token) => {
                info!(video_id, "Cancelling in-flight job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let jobs = self.lock();
        for token in jobs.values() {
            token.cancel();
        }
        jobs.len()
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.lock().contains_key(video_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Claim on a running video id, released on drop.
#[derive(Debug)]
pub struct JobTicket {
    video_id: String,
    token: CancellationToken,
    jobs: InFlightJobs,
}

impl JobTicket {
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for JobTicket {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.video_id);
    }
}
