use axum::extract::Multipart;
use serde::Serialize;
use utoipa::ToSchema;

use super::coordinator::JobProgress;
use super::model::{Bitrate, Job, JobId, JobStatus, OutputFormat, TranscodeRequest};
use crate::common::error::{ErrorKind, ServiceError, ServiceResult};

/// Returned when a transcode job is accepted.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub video_id: String,
    pub status: JobStatus,
    pub format: OutputFormat,
    #[schema(example = 720)]
    pub resolution: u32,
    pub bitrate: Bitrate,
}

impl From<Job> for SubmitResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            video_id: job.video_id,
            status: job.status,
            format: job.request.format,
            resolution: job.request.resolution.height(),
            bitrate: job.request.bitrate,
        }
    }
}

/// Progress payload shared by the polling endpoint and the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub video_id: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProgressResponse {
    /// Fold a progress lookup into a payload. Only infrastructure errors
    /// are passed through.
    pub fn from_lookup(video_id: &str, lookup: ServiceResult<JobProgress>) -> ServiceResult<Self> {
        match lookup {
            Ok(p) => Ok(Self {
                video_id: video_id.to_string(),
                progress: p.progress,
                status: Some(p.status),
                job_id: Some(p.job_id),
                error: None,
                error_kind: None,
            }),
            Err(ServiceError::NoActiveJob {
                last_failure: Some((kind, detail)),
                ..
            }) => Ok(Self {
                video_id: video_id.to_string(),
                progress: 0,
                status: Some(JobStatus::Failed),
                job_id: None,
                error: Some(detail),
                error_kind: Some(kind),
            }),
            Err(e @ ServiceError::NoActiveJob { .. }) => Ok(Self {
                video_id: video_id.to_string(),
                progress: 0,
                status: None,
                job_id: None,
                error: Some(e.to_string()),
                error_kind: None,
            }),
            Err(e) => Err(e),
        }
    }

    /// True once nothing more will change for this job.
    pub fn is_final(&self) -> bool {
        self.progress >= 100 || self.status == Some(JobStatus::Failed)
    }
}

/// Read `format`, `resolution` and `bitrate` from a multipart form.
/// Missing or blank fields fall back to the defaults.
pub async fn parse_transcode_form(mut multipart: Multipart) -> ServiceResult<TranscodeRequest> {
    let mut request = TranscodeRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::InvalidRequest(format!("invalid multipart body: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if !matches!(name.as_str(), "format" | "resolution" | "bitrate") {
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ServiceError::InvalidRequest(format!("invalid {} field: {}", name, e)))?;
        apply_field(&mut request, &name, &value)?;
    }

    Ok(request)
}

fn apply_field(request: &mut TranscodeRequest, name: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Ok(());
    }

    match name {
        "format" => request.format = value.parse().map_err(ServiceError::InvalidRequest)?,
        "resolution" => request.resolution = value.parse().map_err(ServiceError::InvalidRequest)?,
        "bitrate" => request.bitrate = value.parse().map_err(ServiceError::InvalidRequest)?,
        _ => {}
    }
    Ok(())
}
