use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::dto::{parse_transcode_form, ProgressResponse, SubmitResponse};
use super::model::{Job, JobId};
use crate::common::response::{ApiError, ApiSuccess, ErrorBody};
use crate::state::AppState;

/// Queue a transcode job for a video
///
/// Form fields `format` (mp4, hls, dash), `resolution` (240 to 2160) and
/// `bitrate` (500k to 16000k). Missing fields use mp4 / 720 / 1000k.
/// Unrecognized values are rejected with 400 and never replaced by the
/// defaults. Omit a field, or send it blank, to get its default.
#[utoipa::path(
    post,
    path = "/api/videos/transcode/{id}",
    params(
        ("id" = String, Path, description = "Video ID")
    ),
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job queued", body = SubmitResponse),
        (status = 400, description = "Unrecognized format, resolution or bitrate", body = ErrorBody),
        (status = 404, description = "Video not found", body = ErrorBody),
        (status = 409, description = "A job is already active for this video", body = ErrorBody),
        (status = 429, description = "Transcode capacity exhausted", body = ErrorBody)
    ),
    tag = "Transcode"
)]
pub async fn submit_transcode(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<ApiSuccess<SubmitResponse>, ApiError> {
    let request = parse_transcode_form(multipart).await?;
    let job = state.coordinator.submit(&id, request).await?;

    Ok(ApiSuccess(SubmitResponse::from(job), StatusCode::ACCEPTED))
}

/// Progress of the video's most recent transcode job
///
/// Always answers 200. Without a job in flight the progress is 0 and
/// `error` says why.
#[utoipa::path(
    get,
    path = "/api/transcode/progress/{id}",
    params(
        ("id" = String, Path, description = "Video ID")
    ),
    responses(
        (status = 200, description = "Current progress", body = ProgressResponse),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
    tag = "Transcode"
)]
pub async fn get_progress(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let lookup = state.coordinator.progress(&id).await;
    match ProgressResponse::from_lookup(&id, lookup) {
        Ok(body) => ApiSuccess(body, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Transcode job detail
#[utoipa::path(
    get,
    path = "/api/transcode/jobs/{job_id}",
    params(
        ("job_id" = i64, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job detail", body = Job),
        (status = 404, description = "Job not found", body = ErrorBody)
    ),
    tag = "Transcode"
)]
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> impl IntoResponse {
    match state.coordinator.job(job_id).await {
        Ok(job) => ApiSuccess(job, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
