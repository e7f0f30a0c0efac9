//! Configuration types
//!
//! Server and inference configuration, read once from the environment at startup.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL_NAME: &str = "meta-llama/Llama-3.1-8B";
pub const DEFAULT_GGUF_MODEL_PATH: &str = "./model_cache_gguf/llama-3.1-8b.gguf";
pub const DEFAULT_CACHE_DIR: &str = "./model_cache";

/// Which text generator serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Safetensors weights pulled from the Hugging Face Hub, executed with candle
    Hub,
    /// Local GGUF file executed with llama.cpp
    Gguf,
    /// Prebuilt shared library exposing `llama_init` / `llama_run_inference`
    Native,
}

impl BackendKind {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "hub" | "huggingface" => Ok(Self::Hub),
            "gguf" | "llama-cpp" | "llama_cpp" => Ok(Self::Gguf),
            "native" => {
                if cfg!(feature = "native-lib") {
                    Ok(Self::Native)
                } else {
                    Err(ConfigError::BackendUnavailable("native".to_string()))
                }
            }
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Gguf => "gguf",
            Self::Native => "native",
        }
    }

    /// Cap on generated tokens when `RESPONSE_MAX_LENGTH` is unset
    fn default_response_max_length(&self) -> usize {
        match self {
            Self::Hub => 50,
            Self::Gguf | Self::Native => 1000,
        }
    }
}

/// Configuration errors. All of them abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Hugging Face API token is not set. Please set the HUGGINGFACE_TOKEN environment variable.")]
    MissingToken,
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Unknown inference backend: {0}")]
    UnknownBackend(String),
    #[error("Inference backend '{0}' is not compiled into this binary")]
    BackendUnavailable(String),
    #[error("GGUF model not found at '{}'", .0.display())]
    ModelFileNotFound(PathBuf),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub backend: BackendKind,
    /// Hub repository id (or Hub URL) of the model
    pub model_name: String,
    pub model_revision: String,
    /// Directory holding downloaded Hub files
    pub cache_dir: PathBuf,
    /// Maximum accepted input length, in characters
    pub max_request_size: usize,
    /// Prefer an accelerator when one is available
    pub use_gpu: bool,
    /// Maximum number of generated tokens
    pub response_max_length: usize,
    /// Token for gated Hub repositories
    #[serde(skip_serializing)]
    pub hf_token: Option<String>,
    pub gguf_model_path: PathBuf,
    /// Explicit GPU layer offload for the GGUF backend (None = auto)
    pub gguf_gpu_layers: Option<u32>,
    pub gguf_context_size: u32,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Hub,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            model_revision: "main".to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_request_size: 512,
            use_gpu: true,
            response_max_length: BackendKind::Hub.default_response_max_length(),
            hf_token: None,
            gguf_model_path: PathBuf::from(DEFAULT_GGUF_MODEL_PATH),
            gguf_gpu_layers: None,
            gguf_context_size: 2048,
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let backend = match get("INFERENCE_BACKEND") {
            Some(v) => BackendKind::parse(&v)?,
            None => defaults.backend,
        };

        let hf_token = get("HUGGINGFACE_TOKEN");
        if backend == BackendKind::Hub && hf_token.is_none() {
            return Err(ConfigError::MissingToken);
        }

        Ok(Self {
            backend,
            model_name: get("MODEL_NAME").unwrap_or(defaults.model_name),
            model_revision: get("MODEL_REVISION").unwrap_or(defaults.model_revision),
            cache_dir: get("MODEL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            max_request_size: parse_number("MAX_REQUEST_SIZE", get("MAX_REQUEST_SIZE"))?
                .unwrap_or(defaults.max_request_size),
            use_gpu: get("USE_GPU")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.use_gpu),
            response_max_length: parse_number("RESPONSE_MAX_LENGTH", get("RESPONSE_MAX_LENGTH"))?
                .unwrap_or_else(|| backend.default_response_max_length()),
            hf_token,
            gguf_model_path: get("GGUF_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.gguf_model_path),
            gguf_gpu_layers: parse_number("GGUF_GPU_LAYERS", get("GGUF_GPU_LAYERS"))?,
            gguf_context_size: parse_number("GGUF_CONTEXT_SIZE", get("GGUF_CONTEXT_SIZE"))?
                .unwrap_or(defaults.gguf_context_size),
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_number("PORT", get("PORT"))?.unwrap_or(defaults.port),
        })
    }

    /// Checks that must pass before the listener is bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_REQUEST_SIZE",
                value: "0".to_string(),
            });
        }
        if self.backend == BackendKind::Gguf && !self.gguf_model_path.exists() {
            tracing::error!(
                "GGUF model not found at '{}'. Please ensure the model file is present.",
                self.gguf_model_path.display()
            );
            return Err(ConfigError::ModelFileNotFound(self.gguf_model_path.clone()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "yes" | "true" | "t" | "1")
}

fn parse_number<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { key, value: v })
        })
        .transpose()
}
