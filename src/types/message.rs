//! Message types
//!
//! JSON bodies accepted and returned by the HTTP API.

use serde::{Deserialize, Serialize};

/// Body of `POST /predict/`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub input_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: String,
}

/// Body of `POST /generate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Preamble placed on its own line before the prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Generated-token budget (falls back to RESPONSE_MAX_LENGTH)
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Error body shared by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_request_missing_field_is_empty() {
        let req: PredictRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.input_text, "");
    }

    #[test]
    fn test_generate_request_optional_fields() {
        let req: GenerateRequest = serde_json::from_str(r#"{"prompt": "Hi"}"#).unwrap();
        assert_eq!(req.prompt, "Hi");
        assert!(req.system_prompt.is_none());
        assert!(req.max_tokens.is_none());

        let req: GenerateRequest = serde_json::from_str(
            r#"{"prompt": "Hi", "system_prompt": "Be brief", "max_tokens": 16}"#,
        )
        .unwrap();
        assert_eq!(req.system_prompt.as_deref(), Some("Be brief"));
        assert_eq!(req.max_tokens, Some(16));
    }

    #[test]
    fn test_generate_request_requires_prompt() {
        assert!(serde_json::from_str::<GenerateRequest>(r#"{"max_tokens": 3}"#).is_err());
    }
}
