use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::modules::transcode::model::JobId;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Stderr kept on a failed job; the full encoder log only goes to tracing.
pub const MAX_ERROR_DETAIL: usize = 2000;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Video already exists: {0}")]
    VideoExists(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transcode job not found: {0}")]
    JobNotFound(JobId),

    #[error("Video {video_id} already has an active transcode job ({job_id})")]
    JobAlreadyActive { video_id: String, job_id: JobId },

    #[error("No active transcode job for video {video_id}")]
    NoActiveJob {
        video_id: String,
        /// Present when the most recent job failed.
        last_failure: Option<(ErrorKind, String)>,
    },

    #[error("Transcode capacity exhausted, try again later")]
    CapacityExceeded,

    #[error("Encoder failed: {message}")]
    EncodeFailure {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Encode timed out after {0} seconds")]
    Timeout(u64),

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl ServiceError {
    pub fn encode_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::EncodeFailure {
            message: message.into(),
            exit_code,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure(message.into())
    }

    /// Kind recorded on a job that failed with this error.
    pub fn job_error_kind(&self) -> ErrorKind {
        match self {
            ServiceError::Timeout(_) => ErrorKind::Timeout,
            ServiceError::StorageFailure(_) => ErrorKind::StorageFailure,
            _ => ErrorKind::EncodeFailure,
        }
    }

    /// Machine readable tag sent alongside the message in error bodies.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ServiceError::VideoNotFound(_) => "video_not_found",
            ServiceError::VideoExists(_) => "video_exists",
            ServiceError::JobNotFound(_) => "job_not_found",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::JobAlreadyActive { .. } => "job_already_active",
            ServiceError::NoActiveJob { .. } => "no_active_job",
            ServiceError::CapacityExceeded => "capacity_exceeded",
            ServiceError::EncodeFailure { .. } => ErrorKind::EncodeFailure.as_str(),
            ServiceError::Timeout(_) => ErrorKind::Timeout.as_str(),
            ServiceError::StorageFailure(_) => ErrorKind::StorageFailure.as_str(),
        }
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(e: sqlx::Error) -> Self {
        ServiceError::StorageFailure(e.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::StorageFailure(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for ServiceError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        ServiceError::StorageFailure(e.to_string())
    }
}

/// Why a job ended up `failed`. Persisted with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EncodeFailure,
    Timeout,
    StorageFailure,
    /// The process stopped while the job was queued or running.
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::EncodeFailure => "encode_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encode_failure" => Ok(ErrorKind::EncodeFailure),
            "timeout" => Ok(ErrorKind::Timeout),
            "storage_failure" => Ok(ErrorKind::StorageFailure),
            "interrupted" => Ok(ErrorKind::Interrupted),
            other => Err(format!("unknown error kind '{}'", other)),
        }
    }
}

/// Keep the last `max` bytes of an encoder log, cut on a char boundary.
pub fn truncate_detail(detail: &str, max: usize) -> String {
    let detail = detail.trim();
    if detail.len() <= max {
        return detail.to_string();
    }

    let mut start = detail.len() - max;
    while !detail.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &detail[start..])
}
