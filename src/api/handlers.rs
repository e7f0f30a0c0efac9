use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::api::error::ApiError;
use crate::app::{AppState, ModelState};
use crate::inference::GenerationRequest;
use crate::types::message::{
    GenerateRequest, GenerateResponse, MessageResponse, PredictRequest, PredictResponse,
    StatusResponse,
};

/// Trimmed text, rejecting blank input
pub fn require_text(text: &str) -> Result<&str, ApiError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ApiError::EmptyInput);
    }
    Ok(text)
}

/// Trimmed input, or the validation error it fails with
pub fn validate_input(text: &str, max_chars: usize) -> Result<&str, ApiError> {
    let text = require_text(text)?;
    if text.chars().count() > max_chars {
        return Err(ApiError::InputTooLarge);
    }
    Ok(text)
}

pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Welcome to HuggingFace Model API".to_string(),
    })
}

// Liveness only; readiness is reported by `ready`
pub async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "healthy".to_string(),
    })
}

pub async fn ready(State(state): State<AppState>) -> Response {
    match state.model_state().await {
        ModelState::Loaded(generator) => {
            let info = generator.info();
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ready",
                    "model_loaded": true,
                    "backend": info.backend,
                    "model": info.name,
                    "device": info.device,
                })),
            )
                .into_response()
        }
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": other.label(),
                "model_loaded": false,
            })),
        )
            .into_response(),
    }
}

// The body is parsed as JSON whatever its content type
pub async fn predict(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PredictResponse>, ApiError> {
    let payload: PredictRequest = serde_json::from_slice(&body)?;
    let input_text = validate_input(&payload.input_text, state.config.max_request_size)?;

    let generator = state.generator().await.ok_or(ApiError::ModelNotLoaded)?;
    let request = GenerationRequest::new(input_text).with_echo(true);
    let result = generator
        .generate(request)
        .await
        .map_err(ApiError::PredictionFailed)?;

    Ok(Json(PredictResponse { result }))
}

pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(payload) = payload?;
    let generator = state.generator().await.ok_or(ApiError::ModelNotLoaded)?;
    let prompt = require_text(&payload.prompt)?;

    tracing::debug!(
        "Generate request: {} chars, max_tokens {:?}",
        prompt.chars().count(),
        payload.max_tokens
    );

    let request = GenerationRequest::new(prompt)
        .with_system_prompt(payload.system_prompt)
        .with_max_tokens(payload.max_tokens);
    let response = generator
        .generate(request)
        .await
        .map_err(ApiError::GenerationFailed)?;

    Ok(Json(GenerateResponse { response }))
}
