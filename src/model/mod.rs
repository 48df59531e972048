//! The loaded language model and the seam the service calls it through.
//!
//! [`ModelHandle`] pairs a model identifier with a [`TextGenerator`]. The
//! production generator is [`LlamaGenerator`], loaded from a local directory;
//! tests plug in their own implementations.

use std::path::{Path, PathBuf};

use thiserror::Error;

mod device;
mod llama;

pub use device::{Accelerator, select_device};
pub use llama::LlamaGenerator;

/// Sampling temperature used for every generation.
pub const TEMPERATURE: f64 = 0.7;

/// Nucleus-sampling threshold used for every generation.
pub const TOP_P: f64 = 0.9;

/// Errors raised while loading or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid model config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no .safetensors weight files in {0}")]
    NoWeights(PathBuf),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("prompt produced no tokens and the model has no BOS token")]
    EmptyPrompt,

    #[error("prompt is {len} tokens, the model's context window is {limit}")]
    PromptTooLong { len: usize, limit: usize },
}

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Upper bound on newly generated tokens.
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl GenerationParams {
    /// Fixed sampling settings with the given length bound and seed.
    pub fn new(max_new_tokens: usize, seed: u64) -> Self {
        Self {
            max_new_tokens,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            seed,
        }
    }
}

/// Anything that can turn a prompt into text.
///
/// Calls are synchronous and may take seconds; the service runs them on the
/// blocking pool, one at a time.
pub trait TextGenerator: Send + Sync {
    /// Generates a continuation of `prompt`, returning only the new text.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError>;

    /// The accelerator the model currently runs on.
    fn accelerator(&self) -> Accelerator;
}

/// The one loaded model of a service instance. Read-only after construction.
pub struct ModelHandle {
    id: String,
    generator: Box<dyn TextGenerator>,
}

impl ModelHandle {
    pub fn new(id: impl Into<String>, generator: impl TextGenerator + 'static) -> Self {
        Self {
            id: id.into(),
            generator: Box::new(generator),
        }
    }

    /// Loads the Llama-family model in `dir`.
    ///
    /// # Errors
    ///
    /// Any missing or unreadable file, bad config, or tensor failure.
    pub fn load(id: impl Into<String>, dir: &Path, force_cpu: bool) -> Result<Self, ModelError> {
        let device = select_device(force_cpu);
        let generator = LlamaGenerator::load(dir, device)?;
        Ok(Self::new(id, generator))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        self.generator.generate(prompt, params)
    }

    pub fn accelerator(&self) -> Accelerator {
        self.generator.accelerator()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("accelerator", &self.accelerator())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl TextGenerator for Upper {
        fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
            Ok(prompt.to_uppercase().chars().take(params.max_new_tokens).collect())
        }

        fn accelerator(&self) -> Accelerator {
            Accelerator::None
        }
    }

    #[test]
    fn params_use_fixed_sampling() {
        let params = GenerationParams::new(20, 7);
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.top_p, 0.9);
        assert_eq!(params.max_new_tokens, 20);
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn handle_delegates_to_generator() {
        let handle = ModelHandle::new("demo-model", Upper);
        assert_eq!(handle.id(), "demo-model");
        let out = handle.generate("hello", &GenerationParams::new(3, 0)).unwrap();
        assert_eq!(out, "HEL");
        assert_eq!(handle.accelerator(), Accelerator::None);
    }

    #[test]
    fn loading_a_missing_directory_fails() {
        let err = ModelHandle::load("x", Path::new("/definitely/not/a/model"), true).unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
    }
}
