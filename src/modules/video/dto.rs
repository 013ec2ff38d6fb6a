use serde::Serialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::infrastructure::storage::local::MediaStorage;
use crate::modules::transcode::manifest::VideoManifest;
use crate::modules::video::model::Video;

/// A video as the player sees it: source URL plus available renditions.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    pub id: String,
    pub name: String,
    pub url: String,
    pub size: i64,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(flatten)]
    pub manifest: VideoManifest,
}

impl VideoResponse {
    pub fn new(storage: &MediaStorage, video: Video, manifest: VideoManifest) -> Self {
        Self {
            url: storage.source_url(&video.id),
            id: video.id,
            name: video.name,
            size: video.size_bytes,
            created_at: video.created_at,
            manifest,
        }
    }
}
