use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::error::ServiceError;

/// Body of every non-2xx response. The player only reads `error`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

pub struct ApiSuccess<T>(pub T, pub StatusCode);

impl<T> IntoResponse for ApiSuccess<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        let (body, status) = (self.0, self.1);
        (status, Json(body)).into_response()
    }
}

#[derive(Debug)]
pub struct ApiError(pub String, pub StatusCode, pub Option<&'static str>);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(message.into(), StatusCode::BAD_REQUEST, Some("invalid_request"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (message, status, kind) = (self.0, self.1, self.2);
        let body = ErrorBody {
            error: message,
            kind: kind.map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match &e {
            ServiceError::VideoNotFound(_)
            | ServiceError::JobNotFound(_)
            | ServiceError::NoActiveJob { .. } => StatusCode::NOT_FOUND,
            ServiceError::VideoExists(_) | ServiceError::JobAlreadyActive { .. } => StatusCode::CONFLICT,
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::EncodeFailure { .. }
            | ServiceError::Timeout(_)
            | ServiceError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Request failed: {}", e);
        }

        ApiError(e.to_string(), status, Some(e.kind_tag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_status_codes() {
        let cases = [
            (ServiceError::VideoNotFound("a".into()), StatusCode::NOT_FOUND),
            (
                ServiceError::JobAlreadyActive { video_id: "a".into(), job_id: 1 },
                StatusCode::CONFLICT,
            ),
            (ServiceError::CapacityExceeded, StatusCode::TOO_MANY_REQUESTS),
            (ServiceError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (ServiceError::storage("disk"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.1, expected);
        }
    }

    #[test]
    fn error_kind_tag_is_attached() {
        let api: ApiError = ServiceError::CapacityExceeded.into();
        assert_eq!(api.2, Some("capacity_exceeded"));
    }
}
