//! HTTP API
//!
//! Routes, handlers, and error mapping for the inference endpoints.

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers::{generate, health, predict, ready, root};
use crate::app::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/", get(health))
        .route("/ready", get(ready))
        .route("/predict", post(predict))
        .route("/predict/", post(predict))
        .route("/generate", post(generate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{GenerateError, GenerationRequest, TextGenerator};
    use crate::types::config::ServerConfig;
    use crate::types::model::ModelInfo;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Completer;

    #[async_trait]
    impl TextGenerator for Completer {
        fn info(&self) -> ModelInfo {
            ModelInfo {
                backend: "test".to_string(),
                name: "completer".to_string(),
                device: "cpu".to_string(),
            }
        }

        async fn generate(&self, request: GenerationRequest) -> Result<String, GenerateError> {
            Ok(request.finish(" world"))
        }
    }

    fn loaded_router() -> Router {
        create_router(AppState::with_generator(
            ServerConfig::default(),
            Arc::new(Completer),
        ))
    }

    fn empty_router() -> Router {
        create_router(AppState::new(ServerConfig::default()))
    }

    async fn send(
        router: Router,
        method: Method,
        uri: &str,
        content_type: Option<&str>,
        body: &str,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        router.oneshot(request).await.unwrap()
    }

    async fn post_json(router: Router, uri: &str, body: &str) -> Response {
        send(router, Method::POST, uri, Some("application/json"), body).await
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_with_and_without_slash() {
        for uri in ["/health", "/health/"] {
            let response = send(empty_router(), Method::GET, uri, None, "").await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert_eq!(body_json(response).await, json!({"status": "healthy"}));
        }
    }

    #[tokio::test]
    async fn test_root_route() {
        let response = send(empty_router(), Method::GET, "/", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["message"],
            "Welcome to HuggingFace Model API"
        );
    }

    #[tokio::test]
    async fn test_ready_route() {
        let response = send(empty_router(), Method::GET, "/ready", None, "").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "not_loaded");

        let response = send(loaded_router(), Method::GET, "/ready", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["model"], "completer");
    }

    #[tokio::test]
    async fn test_predict_with_and_without_slash() {
        for uri in ["/predict", "/predict/"] {
            let response = post_json(loaded_router(), uri, r#"{"input_text": "Hello"}"#).await;
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert_eq!(body_json(response).await, json!({"result": "Hello world"}));
        }
    }

    #[tokio::test]
    async fn test_predict_without_content_type() {
        let response = send(
            loaded_router(),
            Method::POST,
            "/predict/",
            None,
            r#"{"input_text": "Hello"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["result"], "Hello world");
    }

    #[tokio::test]
    async fn test_predict_oversized_input() {
        let body = json!({ "input_text": "x".repeat(513) }).to_string();
        let response = post_json(loaded_router(), "/predict/", &body).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            body_json(response).await,
            json!({"detail": "Input text is too large"})
        );
    }

    #[tokio::test]
    async fn test_predict_malformed_body() {
        let response = post_json(loaded_router(), "/predict/", "{\"input_text\":").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn test_generate_malformed_body() {
        let response = post_json(loaded_router(), "/generate", "{\"prompt\":").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let detail = body_json(response).await["detail"].clone();
        assert!(detail.as_str().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn test_generate_requires_json_content_type() {
        let response = send(
            loaded_router(),
            Method::POST,
            "/generate",
            Some("text/plain"),
            r#"{"prompt": "Hello"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(body_json(response).await["detail"].is_string());
    }

    #[tokio::test]
    async fn test_generate_before_load() {
        let response = post_json(empty_router(), "/generate", r#"{"prompt": "Hello"}"#).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"detail": "Model not loaded."}));
    }

    #[tokio::test]
    async fn test_generate_route() {
        let response = post_json(
            loaded_router(),
            "/generate",
            r#"{"prompt": "Hello", "max_tokens": 3}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"response": "world"}));
    }
}
