//! Model types
//!
//! Describes the loaded model and where it runs.

use serde::{Deserialize, Serialize};

/// Information about a loaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Backend serving the model ("hub", "gguf", "native")
    pub backend: String,
    /// Hub repository id or path to the model file
    pub name: String,
    /// Compute device, e.g. "cpu", "cuda", or "gpu offload: 100 layers"
    pub device: String,
}
