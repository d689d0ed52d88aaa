//! Central API error type.
//!
//! Validation results are never errors — a request that reaches the
//! pipeline always gets a 200 with findings. HTTP failures are reserved for
//! request-schema violations and unknown projects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lektor_validator::RequestError;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown project '{0}'")]
    UnknownProject(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("storage failure: {0}")]
    Storage(#[from] crate::repository::RepositoryError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("request cancelled")]
    Cancelled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::UnknownProject(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) | ApiError::Request(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Cancelled => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage failure".to_string(),
                )
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal failure".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}
