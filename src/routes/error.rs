use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::admission::AdmissionError;
use crate::services::result_store::StoreError;

/// Error type for HTTP handlers, rendered as `{"error", "code"}` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::InvalidBatch(msg) => ApiError::InvalidBatch(msg),
            AdmissionError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidBatch(msg) => (StatusCode::BAD_REQUEST, "INVALID_BATCH", msg.clone()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Store(err) => {
                tracing::error!(error = %err, "Result store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
