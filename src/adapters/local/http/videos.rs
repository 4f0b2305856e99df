use super::error::{ApiError, ApiResult};
use super::{spawn_processing, HttpState};
use crate::domain::jobs::SourceHandle;
use crate::error::PipelineError;
use crate::ports::events::{EventStatus, VideoProcessingEvent, VIDEO_PROCESSING_EVENT};
use crate::ports::repository::{ProcessingRepository, VideoRegistry, VideoStatus};
use crate::ports::transcoder::Transcoder;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVideo {
    pub id: String,
    pub file_name: String,
    pub size: u64,
    pub events_url: String,
}

/// `POST /videos`: every file field becomes a new video processed in the background.
pub async fn upload<T, R>(
    State(state): State<HttpState<T, R>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Vec<UploadedVideo>>)>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    let mut uploaded = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let video_id = Uuid::new_v4().to_string();
        let key = format!("uploads/{}.{}", video_id, upload_extension(&file_name));

        let size = state.service.store().put_object_stream(&key, field).await?;
        let source = SourceHandle::Object { key };
        state
            .service
            .repository()
            .register_video(&video_id, &source)
            .await?;

        let ticket = state
            .in_flight
            .try_begin(&video_id, &state.shutdown)
            .ok_or_else(|| ApiError::conflict(format!("video {} is already processing", video_id)))?;
        info!(video_id = %video_id, file_name = %file_name, size, "Accepted upload");
        spawn_processing(&state, ticket, source);

        uploaded.push(UploadedVideo {
            events_url: format!("/videos/{}/events", video_id),
            id: video_id,
            file_name,
            size,
        });
    }

    if uploaded.is_empty() {
        return Err(ApiError::bad_request("no file in upload"));
    }
    Ok((StatusCode::ACCEPTED, Json(uploaded)))
}

/// `POST /videos/:id/reprocess`: run a registered video again.
pub async fn reprocess<T, R>(
    State(state): State<HttpState<T, R>>,
    Path(video_id): Path<String>,
) -> ApiResult<StatusCode>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    let ticket = state
        .in_flight
        .try_begin(&video_id, &state.shutdown)
        .ok_or_else(|| ApiError::conflict(format!("video {} is already processing", video_id)))?;
    let source = state
        .service
        .repository()
        .get_video_file_path(&video_id)
        .await?;
    spawn_processing(&state, ticket, source);
    Ok(StatusCode::ACCEPTED)
}

/// `DELETE /videos/:id`: cancel in-flight processing.
pub async fn cancel<T, R>(
    State(state): State<HttpState<T, R>>,
    Path(video_id): Path<String>,
) -> ApiResult<StatusCode>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    if state.in_flight.cancel(&video_id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(PipelineError::not_found(format!("processing of video {}", video_id)).into())
    }
}

/// `GET /videos/:id/file`
pub async fn file<T, R>(
    State(state): State<HttpState<T, R>>,
    Path(video_id): Path<String>,
) -> ApiResult<Response>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    let path = state
        .service
        .get_processed_file(&video_id, &state.namespace)
        .await?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(PipelineError::from)?;

    let content_type = match path.extension().and_then(|ext| ext.to_str()) {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    };
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// `GET /videos/:id/events`: server-sent `videoProcessing` events, closed after
/// the terminal one. A video that is not running replays its last outcome.
pub async fn events<T, R>(
    State(state): State<HttpState<T, R>>,
    Path(video_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    // Subscribe first so a job finishing right now cannot slip through.
    let rx = state.hub.subscribe();
    let replay = if state.in_flight.contains(&video_id) {
        None
    } else {
        let status = state.service.repository().video_status(&video_id).await?;
        Some(last_outcome(&video_id, &status))
    };

    let subscription = Subscription {
        rx,
        video_id,
        replay,
    };
    let stream = futures::stream::unfold(Some(subscription), |current| async move {
        let mut subscription = current?;
        let event = subscription.next().await?;
        let next = if event.status.is_terminal() {
            None
        } else {
            Some(subscription)
        };
        let sse = Event::default()
            .event(VIDEO_PROCESSING_EVENT)
            .json_data(&event);
        Some((sse, next))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Terminal event describing a video that is not running.
fn last_outcome(video_id: &str, status: &VideoStatus) -> VideoProcessingEvent {
    if status.is_processed {
        return VideoProcessingEvent::new(video_id, 100, EventStatus::Completed, "Processing complete");
    }
    match &status.processing_error {
        Some(message) => VideoProcessingEvent::new(
            video_id,
            status.processing_progress,
            EventStatus::Failed,
            message.clone(),
        ),
        None => VideoProcessingEvent::new(
            video_id,
            status.processing_progress,
            EventStatus::Cancelled,
            "Processing is not running",
        ),
    }
}

struct Subscription {
    rx: broadcast::Receiver<VideoProcessingEvent>,
    video_id: String,
    replay: Option<VideoProcessingEvent>,
}

impl Subscription {
    async fn next(&mut self) -> Option<VideoProcessingEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.video_id == self.video_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!(video_id = %self.video_id, missed, "Event subscriber lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

fn upload_extension(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}
