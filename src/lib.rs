//! textgen-server library
//!
//! HTTP façade over a text-generation model loaded from the Hugging Face Hub
//! or from a local GGUF file.

pub mod api;
pub mod app;
pub mod inference;
pub mod storage;
pub mod types;
