//! GGUF text generation
//!
//! Runs a local GGUF model file through llama.cpp.

use crate::inference::{GenerateError, GenerationRequest, TextGenerator};
use crate::types::config::ServerConfig;
use crate::types::model::ModelInfo;
use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Layers offloaded when the engine supports it and no override is set
pub const AUTO_GPU_LAYERS: u32 = 100;

/// Resolve how many layers run on the accelerator
pub fn resolve_gpu_layers(explicit: Option<u32>, use_gpu: bool, supports_offload: bool) -> u32 {
    match explicit {
        Some(layers) => layers,
        None if use_gpu && supports_offload => AUTO_GPU_LAYERS,
        None => 0,
    }
}

fn inference_err(e: impl std::fmt::Display) -> GenerateError {
    GenerateError::Inference(e.to_string())
}

struct GgufModel {
    // Declared before `backend` so the model is freed first
    model: LlamaModel,
    backend: LlamaBackend,
    n_ctx: u32,
    max_new_tokens: usize,
}

impl GgufModel {
    fn load(
        path: &Path,
        explicit_layers: Option<u32>,
        use_gpu: bool,
        n_ctx: u32,
        max_new_tokens: usize,
    ) -> Result<(Self, u32), GenerateError> {
        let backend = LlamaBackend::init().map_err(|e| GenerateError::Load(e.to_string()))?;

        let supports_offload = backend.supports_gpu_offload();
        if supports_offload {
            tracing::info!("GPU acceleration is available.");
        } else {
            tracing::info!("GPU acceleration is not available. Using CPU only.");
        }
        let gpu_layers = resolve_gpu_layers(explicit_layers, use_gpu, supports_offload);

        let params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &params)
            .map_err(|e| GenerateError::Load(e.to_string()))?;

        Ok((
            Self {
                model,
                backend,
                n_ctx,
                max_new_tokens,
            },
            gpu_layers,
        ))
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        let prompt = request.full_prompt();
        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|e| GenerateError::Tokenization(e.to_string()))?;

        let n_ctx = self.n_ctx as usize;
        if tokens.is_empty() || tokens.len() >= n_ctx {
            return Err(GenerateError::Tokenization(format!(
                "prompt of {} tokens does not fit a context of {}",
                tokens.len(),
                n_ctx
            )));
        }
        let budget = request.budget(self.max_new_tokens).min(n_ctx - tokens.len());

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.n_ctx))
            .with_n_batch(self.n_ctx);
        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(inference_err)?;

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        let last_index = tokens.len() as i32 - 1;
        for (i, token) in (0_i32..).zip(tokens.iter()) {
            batch
                .add(*token, i, &[0], i == last_index)
                .map_err(inference_err)?;
        }
        ctx.decode(&mut batch).map_err(inference_err)?;

        let mut sampler = LlamaSampler::greedy();
        let mut n_cur = batch.n_tokens();
        let mut output: Vec<u8> = Vec::new();

        for _ in 0..budget {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }

            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(inference_err)?;
            output.extend_from_slice(&bytes);

            let text = String::from_utf8_lossy(&output);
            if request.stop.iter().any(|s| !s.is_empty() && text.contains(s.as_str())) {
                break;
            }

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(inference_err)?;
            n_cur += 1;
            ctx.decode(&mut batch).map_err(inference_err)?;
        }

        Ok(request.finish(&String::from_utf8_lossy(&output)))
    }
}

/// Generator over a local GGUF file
pub struct GgufGenerator {
    inner: Arc<GgufModel>,
    info: ModelInfo,
}

impl GgufGenerator {
    pub async fn load(config: &ServerConfig) -> Result<Self, GenerateError> {
        let path: PathBuf = config.gguf_model_path.clone();
        if !path.exists() {
            return Err(GenerateError::Load(format!(
                "GGUF model not found at '{}'",
                path.display()
            )));
        }
        tracing::info!("Loading Llama model from '{}'", path.display());

        let explicit_layers = config.gguf_gpu_layers;
        let use_gpu = config.use_gpu;
        let n_ctx = config.gguf_context_size;
        let max_new_tokens = config.response_max_length;
        let load_path = path.clone();
        let (model, gpu_layers) = tokio::task::spawn_blocking(move || {
            GgufModel::load(&load_path, explicit_layers, use_gpu, n_ctx, max_new_tokens)
        })
        .await
        .map_err(|e| GenerateError::Load(e.to_string()))??;

        let device = if gpu_layers > 0 {
            format!("gpu offload: {} layers", gpu_layers)
        } else {
            "cpu".to_string()
        };
        tracing::info!("Llama model loaded successfully ({})", device);

        Ok(Self {
            inner: Arc::new(model),
            info: ModelInfo {
                backend: "gguf".to_string(),
                name: path.display().to_string(),
                device,
            },
        })
    }
}

#[async_trait]
impl TextGenerator for GgufGenerator {
    fn info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerateError> {
        let inner = self.inner.clone();
        let result = tokio::task::spawn_blocking(move || inner.generate(&request))
            .await
            .map_err(|e| GenerateError::Inference(e.to_string()))?;

        if let Err(e) = &result {
            tracing::error!("Error generating text: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_gpu_layers_win() {
        assert_eq!(resolve_gpu_layers(Some(12), false, false), 12);
        assert_eq!(resolve_gpu_layers(Some(0), true, true), 0);
    }

    #[test]
    fn test_auto_gpu_layers() {
        assert_eq!(resolve_gpu_layers(None, true, true), AUTO_GPU_LAYERS);
        assert_eq!(resolve_gpu_layers(None, true, false), 0);
        assert_eq!(resolve_gpu_layers(None, false, true), 0);
    }

    #[tokio::test]
    async fn test_load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            gguf_model_path: dir.path().join("missing.gguf"),
            ..ServerConfig::default()
        };
        let err = GgufGenerator::load(&config).await.err().unwrap();
        assert!(err.to_string().contains("GGUF model not found"));
    }
}
