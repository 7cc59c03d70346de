use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qa_pipeline::PipelineErrorKind;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("upstream dependency failed: {0}")]
    UpstreamFailure(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    InternalError(String),
}

impl From<PipelineErrorKind> for ApiError {
    fn from(err: PipelineErrorKind) -> Self {
        match err {
            PipelineErrorKind::ValidationError(msg) => Self::ValidationError(msg),
            PipelineErrorKind::Cancelled => Self::DeadlineExceeded,
            PipelineErrorKind::EmbeddingFailure(msg)
            | PipelineErrorKind::VectorSearchFailure(msg)
            | PipelineErrorKind::GenerationFailure(msg)
            | PipelineErrorKind::DegradedAnswer(msg) => Self::UpstreamFailure(msg),
            PipelineErrorKind::StorageFailure(msg) => Self::InternalError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::UpstreamFailure(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            Self::InternalError(_) => {
                tracing::error!(error = %self, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                status: "error".to_string(),
                error: message,
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    status: String,
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_maps_to_400() {
        let err: ApiError = PipelineErrorKind::ValidationError("empty question".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn cancelled_maps_to_504() {
        let err: ApiError = PipelineErrorKind::Cancelled.into();
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn storage_failure_maps_to_500() {
        let err: ApiError = PipelineErrorKind::StorageFailure("disk full".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
