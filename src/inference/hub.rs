//! Hub-backed text generation
//!
//! Pulls a Llama-family checkpoint (safetensors) from the Hugging Face Hub and
//! runs it with candle on CUDA, Metal, or CPU.

use crate::inference::{GenerateError, GenerationRequest, TextGenerator};
use crate::storage::huggingface::{HubClient, HubRepo};
use crate::types::config::ServerConfig;
use crate::types::model::ModelInfo;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;

/// Greedy decoding ignores the seed; it only has to be fixed
const SAMPLING_SEED: u64 = 299_792_458;

/// Pick the compute device: an accelerator when enabled and present, else CPU
pub fn select_device(use_gpu: bool) -> Result<Device, GenerateError> {
    if use_gpu && candle_core::utils::cuda_is_available() {
        Device::new_cuda(0).map_err(|e| GenerateError::Load(e.to_string()))
    } else if use_gpu && candle_core::utils::metal_is_available() {
        Device::new_metal(0).map_err(|e| GenerateError::Load(e.to_string()))
    } else {
        Ok(Device::Cpu)
    }
}

/// New tokens allowed for a prompt, bounded by the model's positions
pub fn generation_budget(
    request: &GenerationRequest,
    default: usize,
    prompt_len: usize,
    max_positions: usize,
) -> Result<usize, GenerateError> {
    if prompt_len >= max_positions {
        return Err(GenerateError::Tokenization(format!(
            "prompt of {} tokens does not fit a context of {}",
            prompt_len, max_positions
        )));
    }
    Ok(request.budget(default).min(max_positions - prompt_len))
}

/// Decode generated ids into the response text
///
/// Echoed responses decode prompt and completion in one pass so tokenizers
/// that drop a leading word boundary (Metaspace) keep the space between them.
pub fn decode_output(
    tokenizer: &Tokenizer,
    request: &GenerationRequest,
    tokens: &[u32],
    prompt_len: usize,
) -> Result<String, GenerateError> {
    let decode = |ids: &[u32]| {
        tokenizer
            .decode(ids, true)
            .map_err(|e| GenerateError::Tokenization(e.to_string()))
    };
    let prompt_len = prompt_len.min(tokens.len());

    if request.echo {
        let prompt_end = decode(&tokens[..prompt_len])?.len();
        let sequence = decode(tokens)?;
        Ok(request.finish_sequence(&sequence, prompt_end))
    } else {
        let completion = decode(&tokens[prompt_len..])?;
        Ok(request.finish(&completion))
    }
}

pub fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

struct HubModel {
    model: Llama,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    max_new_tokens: usize,
}

impl HubModel {
    fn load(
        config_path: &Path,
        tokenizer_path: &Path,
        weight_paths: &[PathBuf],
        use_gpu: bool,
        max_new_tokens: usize,
    ) -> Result<Self, GenerateError> {
        let load_err = |e: candle_core::Error| GenerateError::Load(e.to_string());

        let device = select_device(use_gpu)?;
        let dtype = if device.is_cpu() { DType::F32 } else { DType::BF16 };

        let raw = std::fs::read(config_path).map_err(|e| GenerateError::Load(e.to_string()))?;
        let llama_config: LlamaConfig =
            serde_json::from_slice(&raw).map_err(|e| GenerateError::Load(e.to_string()))?;
        let config = llama_config.into_config(false);

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| GenerateError::Load(e.to_string()))?;

        // SAFETY: the weight files live in our cache and are not modified while mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(weight_paths, dtype, &device) }
            .map_err(load_err)?;
        let model = Llama::load(vb, &config).map_err(load_err)?;

        Ok(Self {
            model,
            config,
            tokenizer,
            device,
            dtype,
            max_new_tokens,
        })
    }

    fn is_eos(&self, token: u32) -> bool {
        match &self.config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => *id == token,
            Some(LlamaEosToks::Multiple(ids)) => ids.contains(&token),
            None => false,
        }
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        let inference_err = |e: candle_core::Error| GenerateError::Inference(e.to_string());

        let prompt = request.full_prompt();
        let encoding = self
            .tokenizer
            .encode(prompt.as_str(), true)
            .map_err(|e| GenerateError::Tokenization(e.to_string()))?;
        let prompt_len = encoding.get_ids().len();
        if prompt_len == 0 {
            return Err(GenerateError::Tokenization("prompt produced no tokens".to_string()));
        }

        let budget = generation_budget(
            request,
            self.max_new_tokens,
            prompt_len,
            self.config.max_position_embeddings,
        )?;

        let mut tokens = encoding.get_ids().to_vec();
        let mut cache =
            Cache::new(true, self.dtype, &self.config, &self.device).map_err(inference_err)?;
        let mut logits_processor = LogitsProcessor::new(SAMPLING_SEED, None, None);
        let mut index_pos = 0;

        for step in 0..budget {
            let context = if step == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(inference_err)?;
            let logits = self
                .model
                .forward(&input, index_pos, &mut cache)
                .and_then(|l| l.squeeze(0))
                .map_err(inference_err)?;
            index_pos += context.len();

            let next = logits_processor.sample(&logits).map_err(inference_err)?;
            if self.is_eos(next) {
                break;
            }
            tokens.push(next);
        }

        decode_output(&self.tokenizer, request, &tokens, prompt_len)
    }
}

/// Generator over a Hub checkpoint
pub struct HubGenerator {
    inner: Arc<HubModel>,
    info: ModelInfo,
}

impl HubGenerator {
    /// Download (or reuse cached) model files and load them
    pub async fn load(config: &ServerConfig) -> Result<Self, GenerateError> {
        tracing::info!(
            "Initializing model '{}' with cache directory at '{}'",
            config.model_name,
            config.cache_dir.display()
        );

        let repo = HubRepo::parse(&config.model_name, &config.model_revision)?;
        let client = HubClient::new(&config.cache_dir, config.hf_token.clone())?;

        let config_path = client.fetch(&repo, "config.json").await?;
        let tokenizer_path = client.fetch(&repo, "tokenizer.json").await?;
        let weight_paths = client.fetch_weights(&repo).await?;

        let use_gpu = config.use_gpu;
        let max_new_tokens = config.response_max_length;
        let model = tokio::task::spawn_blocking(move || {
            HubModel::load(
                &config_path,
                &tokenizer_path,
                &weight_paths,
                use_gpu,
                max_new_tokens,
            )
        })
        .await
        .map_err(|e| GenerateError::Load(e.to_string()))?
        .inspect_err(|e| tracing::error!("Failed to load model '{}': {}", config.model_name, e))?;

        let info = ModelInfo {
            backend: "hub".to_string(),
            name: repo.repo_id.clone(),
            device: device_label(&model.device).to_string(),
        };
        tracing::info!(
            "Successfully loaded model '{}' on device '{}'",
            info.name,
            info.device
        );

        Ok(Self {
            inner: Arc::new(model),
            info,
        })
    }
}

#[async_trait]
impl TextGenerator for HubGenerator {
    fn info(&self) -> ModelInfo {
        self.info.clone()
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerateError> {
        let inner = self.inner.clone();
        let result = tokio::task::spawn_blocking(move || inner.generate(&request))
            .await
            .map_err(|e| GenerateError::Inference(e.to_string()))?;

        match &result {
            Ok(text) => tracing::info!("Inference result: {}", text),
            Err(e) => tracing::error!("Inference failed: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Word-level vocabulary with a SentencePiece-style word boundary marker
    const METASPACE_TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "first", "split": true},
        "post_processor": null,
        "decoder": {"type": "Metaspace", "replacement": "▁", "prepend_scheme": "first", "split": true},
        "model": {
            "type": "WordLevel",
            "vocab": {"<unk>": 0, "▁Once": 1, "▁upon": 2, "▁a": 3, "▁time": 4},
            "unk_token": "<unk>"
        }
    }"#;

    fn metaspace_tokenizer() -> Tokenizer {
        Tokenizer::from_bytes(METASPACE_TOKENIZER.as_bytes()).unwrap()
    }

    #[test]
    fn test_echo_keeps_word_boundary() {
        let tokenizer = metaspace_tokenizer();
        let request = GenerationRequest::new("Once upon").with_echo(true);
        let text = decode_output(&tokenizer, &request, &[1, 2, 3, 4], 2).unwrap();
        assert_eq!(text, "Once upon a time");
    }

    #[test]
    fn test_completion_only_without_echo() {
        let tokenizer = metaspace_tokenizer();
        let request = GenerationRequest::new("Once upon");
        let text = decode_output(&tokenizer, &request, &[1, 2, 3, 4], 2).unwrap();
        assert_eq!(text, "a time");
    }

    #[test]
    fn test_echo_with_nothing_generated() {
        let tokenizer = metaspace_tokenizer();
        let request = GenerationRequest::new("Once upon").with_echo(true);
        let text = decode_output(&tokenizer, &request, &[1, 2], 2).unwrap();
        assert_eq!(text, "Once upon");
    }

    #[test]
    fn test_budget_limited_by_positions() {
        let request = GenerationRequest::new("Hi");
        assert_eq!(generation_budget(&request, 50, 10, 2048).unwrap(), 50);
        assert_eq!(generation_budget(&request, 50, 2040, 2048).unwrap(), 8);
    }

    #[test]
    fn test_prompt_filling_context_is_rejected() {
        let request = GenerationRequest::new("Hi");
        for prompt_len in [2048, 4096] {
            let err = generation_budget(&request, 50, prompt_len, 2048).unwrap_err();
            assert!(matches!(err, GenerateError::Tokenization(_)));
        }
    }

    #[test]
    fn test_cpu_selected_when_gpu_disabled() {
        let device = select_device(false).unwrap();
        assert!(device.is_cpu());
        assert_eq!(device_label(&device), "cpu");
    }

    #[tokio::test]
    async fn test_load_fails_on_invalid_model_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            model_name: "not-a-repo".to_string(),
            cache_dir: dir.path().to_path_buf(),
            hf_token: Some("token".to_string()),
            ..ServerConfig::default()
        };
        let err = HubGenerator::load(&config).await.err().unwrap();
        assert!(matches!(err, GenerateError::Load(_)));
    }
}
