//! HTTP error mapping
//!
//! Every failure a handler can return, and the one place that turns it into a
//! status code and a `{"detail": ...}` body.

use crate::inference::GenerateError;
use crate::types::message::ErrorResponse;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Input text is required")]
    EmptyInput,
    #[error("Input text is too large")]
    InputTooLarge,
    #[error("Model not loaded.")]
    ModelNotLoaded,
    /// `/predict/` failure; the cause is logged, never returned
    #[error("Internal Server Error")]
    PredictionFailed(#[source] GenerateError),
    /// `/generate` failure; the cause is logged, never returned
    #[error("Error generating text.")]
    GenerationFailed(#[source] GenerateError),
    #[error("{message}")]
    InvalidBody { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::EmptyInput => StatusCode::BAD_REQUEST,
            ApiError::InputTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelNotLoaded
            | ApiError::PredictionFailed(_)
            | ApiError::GenerationFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidBody { status, .. } => *status,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidBody {
            status: StatusCode::BAD_REQUEST,
            message: format!("Failed to parse the request body as JSON: {}", err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::PredictionFailed(e) => tracing::error!("Error during inference: {}", e),
            ApiError::GenerationFailed(e) => tracing::error!("Error generating text: {}", e),
            ApiError::ModelNotLoaded => tracing::warn!("Request rejected: model not loaded"),
            other => tracing::debug!("Rejected request: {}", other),
        }
        let body = ErrorResponse {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
