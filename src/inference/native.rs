//! Shared-library text generation
//!
//! Calls a prebuilt `libllama_wrapper` exposing two C symbols:
//! `void llama_init(void)` and `const char* llama_run_inference(const char*)`.
//! The returned string is owned by the library and copied before the next call.

use crate::inference::{GenerateError, GenerationRequest, TextGenerator};
use crate::types::config::ServerConfig;
use crate::types::model::ModelInfo;
use async_trait::async_trait;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Arc, Mutex};

mod ffi {
    use std::os::raw::c_char;

    #[link(name = "llama_wrapper")]
    extern "C" {
        pub fn llama_init();
        pub fn llama_run_inference(input: *const c_char) -> *const c_char;
    }
}

/// Thread safety of the library is unknown, so every call goes through one lock
struct NativeLib {
    lock: Mutex<()>,
}

impl NativeLib {
    fn init() -> Self {
        // SAFETY: takes no arguments; called once per process from `load`
        unsafe { ffi::llama_init() };
        Self {
            lock: Mutex::new(()),
        }
    }

    fn run(&self, input: &str) -> Result<String, GenerateError> {
        let input = CString::new(input)
            .map_err(|e| GenerateError::Tokenization(format!("prompt contains NUL: {}", e)))?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| GenerateError::Inference("native library lock poisoned".to_string()))?;

        // SAFETY: `input` is a valid NUL-terminated string for the duration of the call
        let output: *const c_char = unsafe { ffi::llama_run_inference(input.as_ptr()) };
        if output.is_null() {
            return Err(GenerateError::Inference(
                "llama_run_inference returned null".to_string(),
            ));
        }

        // SAFETY: non-null pointer to a NUL-terminated string owned by the library
        let text = unsafe { CStr::from_ptr(output) };
        Ok(text.to_string_lossy().into_owned())
    }
}

pub struct NativeLibGenerator {
    inner: Arc<NativeLib>,
}

impl NativeLibGenerator {
    pub async fn load(_config: &ServerConfig) -> Result<Self, GenerateError> {
        tracing::info!("Initializing native llama library");
        let lib = tokio::task::spawn_blocking(NativeLib::init)
            .await
            .map_err(|e| GenerateError::Load(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(lib),
        })
    }
}

#[async_trait]
impl TextGenerator for NativeLibGenerator {
    fn info(&self) -> ModelInfo {
        ModelInfo {
            backend: "native".to_string(),
            name: "libllama_wrapper".to_string(),
            device: "native".to_string(),
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerateError> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            inner
                .run(&request.full_prompt())
                .map(|raw| request.finish(&raw))
        })
        .await
        .map_err(|e| GenerateError::Inference(e.to_string()))?
    }
}
