use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::dto::VideoResponse;
use super::service::VideoService;
use crate::common::response::{ApiError, ApiSuccess, ErrorBody};
use crate::state::AppState;

/// List all videos, newest first
#[utoipa::path(
    get,
    path = "/api/videos",
    responses(
        (status = 200, description = "List of videos", body = Vec<VideoResponse>),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn list_videos(State(state): State<AppState>) -> impl IntoResponse {
    match VideoService::find_all(&state).await {
        Ok(videos) => ApiSuccess(videos, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Get a video with its available renditions
#[utoipa::path(
    get,
    path = "/api/videos/{id}",
    params(
        ("id" = String, Path, description = "Video ID (the uploaded file name)")
    ),
    responses(
        (status = 200, description = "Video details", body = VideoResponse),
        (status = 404, description = "Video not found", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn get_video(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match VideoService::find_by_id(&state, &id).await {
        Ok(video) => ApiSuccess(video, StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Upload a source video (multipart field `video`)
#[utoipa::path(
    post,
    path = "/api/videos",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Video stored", body = VideoResponse),
        (status = 400, description = "Missing field, bad type or too large", body = ErrorBody),
        (status = 409, description = "A video with this name exists", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiSuccess<VideoResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some("video") {
            let video = VideoService::upload(&state, field).await?;
            return Ok(ApiSuccess(video, StatusCode::CREATED));
        }
    }

    Err(ApiError::bad_request("No video field found in multipart request"))
}

/// Delete a video, its renditions and files
#[utoipa::path(
    delete,
    path = "/api/videos/{id}",
    params(
        ("id" = String, Path, description = "Video ID")
    ),
    responses(
        (status = 204, description = "Video deleted"),
        (status = 404, description = "Video not found", body = ErrorBody),
        (status = 409, description = "A transcode job is active", body = ErrorBody)
    ),
    tag = "Videos"
)]
pub async fn delete_video(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match VideoService::delete(&state, &id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
