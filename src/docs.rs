use utoipa::OpenApi;

use crate::common::error::ErrorKind;
use crate::common::response::ErrorBody;
use crate::modules::transcode::dto::{ProgressResponse, SubmitResponse};
use crate::modules::transcode::manifest::VideoManifest;
use crate::modules::transcode::model::{Bitrate, Job, JobStatus, OutputFormat, TranscodeRequest};
use crate::modules::video::dto::VideoResponse;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::video::handler::list_videos,
        crate::modules::video::handler::get_video,
        crate::modules::video::handler::upload_video,
        crate::modules::video::handler::delete_video,
        crate::modules::transcode::handler::submit_transcode,
        crate::modules::transcode::handler::get_progress,
        crate::modules::transcode::handler::get_job,
    ),
    components(
        schemas(
            VideoResponse, VideoManifest, ErrorBody,
            SubmitResponse, ProgressResponse, Job, TranscodeRequest,
            OutputFormat, Bitrate, JobStatus, ErrorKind,
        )
    ),
    tags(
        (name = "Videos", description = "Source video management"),
        (name = "Transcode", description = "Transcode jobs and progress")
    )
)]
pub struct ApiDoc;
