//! Application state
//!
//! Owns the configuration and the model slot shared by every request handler.

use crate::inference::{self, GenerateError, TextGenerator};
use crate::types::config::ServerConfig;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Represents the current state of the model
#[derive(Clone)]
pub enum ModelState {
    NotLoaded,
    Loading,
    Loaded(Arc<dyn TextGenerator>),
    Failed(String),
}

impl ModelState {
    pub fn label(&self) -> &'static str {
        match self {
            ModelState::NotLoaded => "not_loaded",
            ModelState::Loading => "loading",
            ModelState::Loaded(_) => "loaded",
            ModelState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelState::Loaded(generator) => {
                f.debug_tuple("Loaded").field(&generator.info()).finish()
            }
            ModelState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// State shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    model: Arc<RwLock<ModelState>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        tracing::info!("AppState initialized (backend: {})", config.backend.as_str());
        Self {
            config: Arc::new(config),
            model: Arc::new(RwLock::new(ModelState::NotLoaded)),
        }
    }

    /// State with an already-loaded generator
    pub fn with_generator(config: ServerConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            config: Arc::new(config),
            model: Arc::new(RwLock::new(ModelState::Loaded(generator))),
        }
    }

    pub async fn model_state(&self) -> ModelState {
        self.model.read().await.clone()
    }

    pub async fn set_model_state(&self, state: ModelState) {
        *self.model.write().await = state;
    }

    /// The generator, once loading has finished
    pub async fn generator(&self) -> Option<Arc<dyn TextGenerator>> {
        match &*self.model.read().await {
            ModelState::Loaded(generator) => Some(generator.clone()),
            _ => None,
        }
    }

    /// Load the configured model in the background
    ///
    /// The handle resolves to the load error, if any, so the caller can stop
    /// serving when the model cannot be materialized.
    pub fn spawn_model_loader(&self) -> JoinHandle<Result<(), GenerateError>> {
        let state = self.clone();
        tokio::spawn(async move {
            state.set_model_state(ModelState::Loading).await;
            match inference::load_generator(&state.config).await {
                Ok(generator) => {
                    tracing::info!("Model initialized during startup");
                    state.set_model_state(ModelState::Loaded(generator)).await;
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Failed to load model during startup: {}", e);
                    state.set_model_state(ModelState::Failed(e.to_string())).await;
                    Err(e)
                }
            }
        })
    }
}
