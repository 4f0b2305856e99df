use super::error::{ApiError, ApiResult};
use super::HttpState;
use crate::domain::artifacts::DanglingFile;
use crate::ports::repository::{ProcessingRepository, VideoRegistry};
use crate::ports::transcoder::Transcoder;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

/// `GET /artifacts`
pub async fn list<T, R>(State(state): State<HttpState<T, R>>) -> ApiResult<Json<Vec<DanglingFile>>>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    let files = state.service.get_dangling_files(&state.namespace).await?;
    Ok(Json(files))
}

/// `DELETE /artifacts/:id`, idempotent.
pub async fn cleanup<T, R>(
    State(state): State<HttpState<T, R>>,
    Path(video_id): Path<String>,
) -> ApiResult<StatusCode>
where
    T: Transcoder + 'static,
    R: ProcessingRepository + VideoRegistry + 'static,
{
    if state.in_flight.contains(&video_id) {
        return Err(ApiError::conflict(format!(
            "video {} is still being processed",
            video_id
        )));
    }
    state.service.cleanup(&video_id, &state.namespace).await?;
    Ok(StatusCode::NO_CONTENT)
}
