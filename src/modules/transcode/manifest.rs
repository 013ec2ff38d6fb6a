use serde::Serialize;
use utoipa::ToSchema;

use super::model::{Rendition, RenditionKind};
use crate::infrastructure::storage::local::MediaStorage;

/// Which renditions of a video the player can pick from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct VideoManifest {
    #[serde(rename = "hasHLS")]
    pub has_hls: bool,
    #[serde(rename = "hlsUrl", skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
    #[serde(rename = "hasDASH")]
    pub has_dash: bool,
    #[serde(rename = "dashUrl", skip_serializing_if = "Option::is_none")]
    pub dash_url: Option<String>,
    #[serde(rename = "hasMP4")]
    pub has_mp4: bool,
    #[serde(rename = "mp4Versions")]
    pub mp4_versions: Vec<String>,
}

pub struct ManifestPublisher;

impl ManifestPublisher {
    /// `renditions` must be ordered by id. The newest ladder of each kind
    /// wins its URL; mp4 variants are listed in the order they appeared.
    pub fn build(storage: &MediaStorage, renditions: &[Rendition]) -> VideoManifest {
        let mut manifest = VideoManifest::default();

        for rendition in renditions {
            let url = storage.rendition_url(&rendition.path);
            match rendition.kind {
                RenditionKind::HlsLadder => {
                    manifest.has_hls = true;
                    manifest.hls_url = Some(url);
                }
                RenditionKind::DashLadder => {
                    manifest.has_dash = true;
                    manifest.dash_url = Some(url);
                }
                RenditionKind::Mp4Variant => {
                    manifest.has_mp4 = true;
                    manifest.mp4_versions.push(url);
                }
            }
        }

        manifest
    }
}
