//! LLM inference
//!
//! This module hides the model backends behind a single [`TextGenerator`] trait.
//! The backend is picked from configuration at startup.

pub mod gguf;
pub mod hub;
#[cfg(feature = "native-lib")]
pub mod native;

use crate::storage::StorageError;
use crate::types::config::{BackendKind, ServerConfig};
use crate::types::model::ModelInfo;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Stop sequence applied to every completion
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Inference errors
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Model loading failed: {0}")]
    Load(String),
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

impl From<StorageError> for GenerateError {
    fn from(err: StorageError) -> Self {
        GenerateError::Load(err.to_string())
    }
}

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Generated-token budget; backends fall back to their configured cap
    pub max_tokens: Option<usize>,
    pub stop: Vec<String>,
    /// Return the prompt followed by the completion
    pub echo: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            max_tokens: None,
            stop: vec![END_OF_TEXT.to_string()],
            echo: false,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|s| !s.is_empty());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Prompt text handed to the model
    pub fn full_prompt(&self) -> String {
        match &self.system_prompt {
            Some(system) => format!("{}\n{}", system, self.prompt),
            None => self.prompt.clone(),
        }
    }

    /// Token budget, never below one
    pub fn budget(&self, default: usize) -> usize {
        self.max_tokens.unwrap_or(default).max(1)
    }

    /// Turn raw model output into the response text
    ///
    /// Cuts at the first stop sequence, prepends the prompt when echoing,
    /// and trims surrounding whitespace.
    pub fn finish(&self, completion: &str) -> String {
        let completion = self.cut_at_stop(completion);
        if self.echo {
            format!("{}{}", self.full_prompt(), completion).trim().to_string()
        } else {
            completion.trim().to_string()
        }
    }

    /// Like [`finish`](Self::finish), for backends that decode the prompt and
    /// completion together. Only the part after `prompt_end` is searched for
    /// stop sequences.
    pub fn finish_sequence(&self, sequence: &str, prompt_end: usize) -> String {
        let prompt_end = floor_char_boundary(sequence, prompt_end);
        let (prompt, completion) = sequence.split_at(prompt_end);
        format!("{}{}", prompt, self.cut_at_stop(completion))
            .trim()
            .to_string()
    }

    fn cut_at_stop<'a>(&self, completion: &'a str) -> &'a str {
        let cut = self
            .stop
            .iter()
            .filter(|s| !s.is_empty())
            .filter_map(|s| completion.find(s.as_str()))
            .min()
            .unwrap_or(completion.len());
        &completion[..cut]
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// A loaded model that turns prompts into text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn info(&self) -> ModelInfo;
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerateError>;
}

/// Load the generator selected by `config.backend`
pub async fn load_generator(config: &ServerConfig) -> Result<Arc<dyn TextGenerator>, GenerateError> {
    match config.backend {
        BackendKind::Hub => {
            let generator = hub::HubGenerator::load(config).await?;
            Ok(Arc::new(generator))
        }
        BackendKind::Gguf => {
            let generator = gguf::GgufGenerator::load(config).await?;
            Ok(Arc::new(generator))
        }
        #[cfg(feature = "native-lib")]
        BackendKind::Native => {
            let generator = native::NativeLibGenerator::load(config).await?;
            Ok(Arc::new(generator))
        }
        #[cfg(not(feature = "native-lib"))]
        BackendKind::Native => Err(GenerateError::Load(
            "native backend is not compiled into this binary".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_prompt_with_system_preamble() {
        let req = GenerationRequest::new("What is Rust?")
            .with_system_prompt(Some("You are terse.".to_string()));
        assert_eq!(req.full_prompt(), "You are terse.\nWhat is Rust?");
    }

    #[test]
    fn test_empty_system_prompt_is_ignored() {
        let req = GenerationRequest::new("Hi").with_system_prompt(Some(String::new()));
        assert_eq!(req.full_prompt(), "Hi");
    }

    #[test]
    fn test_finish_cuts_at_stop_sequence() {
        let req = GenerationRequest::new("Hi");
        assert_eq!(req.finish("  Hello there<|endoftext|>junk"), "Hello there");
    }

    #[test]
    fn test_finish_uses_earliest_stop() {
        let mut req = GenerationRequest::new("Hi");
        req.stop.push("\n\n".to_string());
        assert_eq!(req.finish("one\n\ntwo<|endoftext|>"), "one");
    }

    #[test]
    fn test_finish_with_echo() {
        let req = GenerationRequest::new("Once upon").with_echo(true);
        assert_eq!(req.finish(" a time"), "Once upon a time");
    }

    #[test]
    fn test_finish_sequence_keeps_decoded_prompt() {
        let req = GenerationRequest::new("Once upon").with_echo(true);
        assert_eq!(
            req.finish_sequence("Once upon a time<|endoftext|>more", 9),
            "Once upon a time"
        );
    }

    #[test]
    fn test_finish_sequence_ignores_stop_inside_prompt() {
        let req = GenerationRequest::new("a<|endoftext|>b").with_echo(true);
        assert_eq!(
            req.finish_sequence("a<|endoftext|>b c<|endoftext|>", 15),
            "a<|endoftext|>b c"
        );
    }

    #[test]
    fn test_finish_sequence_clamps_prompt_end() {
        let req = GenerationRequest::new("é").with_echo(true);
        assert_eq!(req.finish_sequence("é!", 1), "é!");
        assert_eq!(req.finish_sequence("é", 40), "é");
    }

    #[test]
    fn test_budget_defaults_and_floor() {
        let req = GenerationRequest::new("Hi");
        assert_eq!(req.budget(50), 50);
        assert_eq!(req.clone().with_max_tokens(Some(8)).budget(50), 8);
        assert_eq!(req.with_max_tokens(Some(0)).budget(50), 1);
    }
}
