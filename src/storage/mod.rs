//! Model storage
//!
//! This module handles downloading model files into the local cache.

pub mod huggingface;

use thiserror::Error;

/// Error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid model identifier: {0}")]
    InvalidRepo(String),
    #[error("File not found on the Hub: {0}")]
    NotFound(String),
    #[error("Download of {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("Download incomplete: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
}
