use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors returned by the HTTP handlers.
///
/// Every variant is rendered as `{"detail": "<message>"}` with the status
/// returned by [`ServiceError::status`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The diffusion pipeline failed to load at startup.
    #[error("Pipeline not loaded")]
    PipelineNotLoaded,

    /// The pipeline, the blocking task running it, or PNG encoding failed.
    #[error("{0}")]
    Generation(String),

    /// A required multipart part or form value was not sent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The multipart body could not be read.
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::PipelineNotLoaded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Multipart(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_message_is_passed_through() {
        let error = ServiceError::Generation("CUDA out of memory".to_string());
        assert_eq!(error.to_string(), "CUDA out of memory");
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ServiceError::PipelineNotLoaded.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::MissingField("image").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
