//! HTTP inbound adapter.
//!
//! Accepts uploads, streams processing progress over server-sent events and
//! serves processed files of one namespace.

mod artifacts;
pub mod error;
mod videos;

pub use videos::UploadedVideo;

use super::events::EventHub;
use super::fs::FsMediaStore;
use crate::application::orchestrator::VideoProcessingService;
use crate::application::registry::{InFlightJobs, JobTicket};
use crate::domain::jobs::{Namespace, SourceHandle, VideoInput};
use crate::ports::repository::{ProcessingRepository, VideoRegistry};
use crate::ports::transcoder::Transcoder;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type HttpService<T, R> = VideoProcessingService<FsMediaStore, T, R, Arc<EventHub>>;

pub struct HttpState<T, R> {
    pub service: Arc<HttpService<T, R>>,
    pub hub: Arc<EventHub>,
    pub in_flight: InFlightJobs,
    pub namespace: Namespace,
    /// Parent of every job token; cancelled on shutdown
    pub shutdown: CancellationToken,
}

impl<T, R> Clone for HttpState<T, R> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            hub: Arc::clone(&self.hub),
            in_flight: self.in_flight.clone(),
            namespace: self.namespace.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

pub fn router<T, R>(state: HttpState<T, R>) -> Router
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    Router::new()
        .route("/videos", post(videos::upload::<T, R>))
        .route("/videos/:id", delete(videos::cancel::<T, R>))
        .route("/videos/:id/events", get(videos::events::<T, R>))
        .route("/videos/:id/file", get(videos::file::<T, R>))
        .route("/videos/:id/reprocess", post(videos::reprocess::<T, R>))
        .route("/artifacts", get(artifacts::list::<T, R>))
        .route("/artifacts/:id", delete(artifacts::cleanup::<T, R>))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Run one video in the background, holding `ticket` until it ends.
fn spawn_processing<T, R>(state: &HttpState<T, R>, ticket: JobTicket, source: SourceHandle)
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    let service = Arc::clone(&state.service);
    let namespace = state.namespace.clone();
    tokio::spawn(async move {
        let video_id = ticket.video_id().to_string();
        let input = VideoInput::new(video_id.clone(), source);
        if let Err(e) = service
            .process_video_from_file(input, &namespace, None, ticket.token())
            .await
        {
            // already recorded by the service
            debug!(video_id = %video_id, "Background processing ended: {}", e);
        }
    });
}
