use axum::extract::multipart::Field;
use tokio::fs;
use tracing::{info, warn};

use super::dto::VideoResponse;
use super::repository::VideoRepository;
use crate::common::error::{ServiceError, ServiceResult};
use crate::common::upload::{stream_to_disk, validate_content_type, video_id_from_file_name};
use crate::modules::transcode::repository::JobRepository;
use crate::state::AppState;

pub struct VideoService;

impl VideoService {
    pub async fn find_all(state: &AppState) -> ServiceResult<Vec<VideoResponse>> {
        let videos = VideoRepository::list(&state.db).await?;

        let mut out = Vec::with_capacity(videos.len());
        for video in videos {
            let manifest = state.coordinator.manifest_unchecked(&video.id).await?;
            out.push(VideoResponse::new(&state.storage, video, manifest));
        }
        Ok(out)
    }

    pub async fn find_by_id(state: &AppState, id: &str) -> ServiceResult<VideoResponse> {
        let video = VideoRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| ServiceError::VideoNotFound(id.to_string()))?;
        let manifest = state.coordinator.manifest_unchecked(&video.id).await?;

        Ok(VideoResponse::new(&state.storage, video, manifest))
    }

    /// Store an uploaded source. The file is streamed to a temporary name
    /// and only renamed into place once complete.
    pub async fn upload(state: &AppState, field: Field<'_>) -> ServiceResult<VideoResponse> {
        let file_name = field
            .file_name()
            .ok_or_else(|| ServiceError::InvalidRequest("video field has no file name".to_string()))?
            .to_string();
        validate_content_type(field.content_type(), &file_name)?;
        let id = video_id_from_file_name(&file_name)?;

        let video = {
            let _guard = state.coordinator.lock_video(&id).await;
            Self::store(state, field, &id).await?
        };
        info!(video_id = %video.id, size = video.size_bytes, "Video uploaded");
        Ok(VideoResponse::new(&state.storage, video, Default::default()))
    }

    async fn store(state: &AppState, field: Field<'_>, id: &str) -> ServiceResult<super::model::Video> {
        if VideoRepository::find_by_id(&state.db, id).await?.is_some() {
            return Err(ServiceError::VideoExists(id.to_string()));
        }

        let dest = state.storage.source_path(id);
        if fs::try_exists(&dest).await? {
            return Err(ServiceError::VideoExists(id.to_string()));
        }

        let temp = state.storage.upload_temp_path();
        let size = stream_to_disk(field, &temp, state.config.max_upload_bytes as u64).await?;

        if let Err(e) = fs::rename(&temp, &dest).await {
            let _ = fs::remove_file(&temp).await;
            return Err(ServiceError::storage(format!("failed to store {}: {}", id, e)));
        }

        let size = i64::try_from(size).unwrap_or(i64::MAX);
        match VideoRepository::create(&state.db, id, id, id, size).await {
            Ok(video) => Ok(video),
            Err(e) => {
                let _ = fs::remove_file(&dest).await;
                Err(e.into())
            }
        }
    }

    /// Remove a video with its renditions. Refused while a job is active.
    pub async fn delete(state: &AppState, id: &str) -> ServiceResult<()> {
        let _guard = state.coordinator.lock_video(id).await;
        Self::delete_locked(state, id).await
    }

    async fn delete_locked(state: &AppState, id: &str) -> ServiceResult<()> {
        let video = VideoRepository::find_by_id(&state.db, id)
            .await?
            .ok_or_else(|| ServiceError::VideoNotFound(id.to_string()))?;

        if let Some(active) = JobRepository::find_active_by_video(&state.db, id).await? {
            return Err(ServiceError::JobAlreadyActive {
                video_id: id.to_string(),
                job_id: active.id,
            });
        }

        VideoRepository::delete(&state.db, id).await?;

        if let Err(e) = state.storage.remove_video_files(&video.id, &video.source_file).await {
            warn!(video_id = %video.id, "Video deleted but files remain: {}", e);
        }

        info!(video_id = %video.id, "Video deleted");
        Ok(())
    }
}
