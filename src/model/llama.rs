//! Llama-family causal LM loaded from a local directory with candle.
//!
//! Expected layout: `config.json`, `tokenizer.json`, and either
//! `model.safetensors` or sharded `model-0000N-of-0000M.safetensors`.

use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::{Accelerator, GenerationParams, ModelError, TextGenerator};

/// End-of-sequence spellings checked when `config.json` names none.
const EOS_TOKENS: [&str; 3] = ["</s>", "<|endoftext|>", "<|eot_id|>"];

pub struct LlamaGenerator {
    model: Llama,
    tokenizer: Tokenizer,
    config: Config,
    device: Device,
    dtype: DType,
    eos_tokens: Vec<u32>,
}

impl LlamaGenerator {
    /// Loads config, tokenizer, and weights from `dir` onto `device`.
    ///
    /// Weights are F16 on an accelerator and F32 on the CPU.
    pub fn load(dir: &Path, device: Device) -> Result<Self, ModelError> {
        let config_path = dir.join("config.json");
        let raw = fs::read(&config_path).map_err(|source| ModelError::Io {
            path: config_path.clone(),
            source,
        })?;
        let llama_config: LlamaConfig =
            serde_json::from_slice(&raw).map_err(|source| ModelError::Config {
                path: config_path,
                source,
            })?;
        let config = llama_config.into_config(false);

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;

        let weights = discover_safetensors(dir)?;
        let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };
        info!(
            dir = %dir.display(),
            shards = weights.len(),
            ?dtype,
            layers = config.num_hidden_layers,
            vocab = config.vocab_size,
            "loading weights"
        );

        // SAFETY: the weight files are opened read-only and are not modified
        // while the service is running.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device)? };
        let model = Llama::load(vb, &config)?;

        let eos_tokens = eos_tokens(&config, &tokenizer);
        debug!(?eos_tokens, "end-of-sequence tokens");

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
            dtype,
            eos_tokens,
        })
    }

    fn prompt_tokens(&self, prompt: &str) -> Result<Vec<u32>, ModelError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))?;
        let mut tokens = encoding.get_ids().to_vec();
        if tokens.is_empty() {
            tokens.push(self.config.bos_token_id.ok_or(ModelError::EmptyPrompt)?);
        }
        fits_context(tokens.len(), self.config.max_position_embeddings)?;
        Ok(tokens)
    }
}

impl TextGenerator for LlamaGenerator {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, ModelError> {
        let mut tokens = self.prompt_tokens(prompt)?;
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        let mut sampler = LogitsProcessor::from_sampling(
            params.seed,
            Sampling::TopP {
                p: params.top_p,
                temperature: params.temperature,
            },
        );

        let mut generated = Vec::with_capacity(params.max_new_tokens);
        let mut index_pos = 0;

        for step in 0..params.max_new_tokens {
            if tokens.len() >= self.config.max_position_embeddings {
                debug!(len = tokens.len(), "context window full");
                break;
            }

            // First step feeds the whole prompt; later steps reuse the KV cache.
            let context = if step == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, index_pos, &mut cache)?;
            let logits = logits.squeeze(0)?;
            index_pos += context.len();

            let next = sampler.sample(&logits)?;
            if self.eos_tokens.contains(&next) {
                break;
            }
            tokens.push(next);
            generated.push(next);
        }

        self.tokenizer
            .decode(&generated, true)
            .map_err(|e| ModelError::Tokenizer(e.to_string()))
    }

    fn accelerator(&self) -> Accelerator {
        Accelerator::probe(&self.device)
    }
}

/// A prompt must leave room for at least one generated token.
fn fits_context(len: usize, limit: usize) -> Result<(), ModelError> {
    if len >= limit {
        return Err(ModelError::PromptTooLong { len, limit });
    }
    Ok(())
}

fn eos_tokens(config: &Config, tokenizer: &Tokenizer) -> Vec<u32> {
    match &config.eos_token_id {
        Some(LlamaEosToks::Single(id)) => vec![*id],
        Some(LlamaEosToks::Multiple(ids)) => ids.clone(),
        None => EOS_TOKENS
            .iter()
            .filter_map(|token| tokenizer.token_to_id(token))
            .collect(),
    }
}

/// Lists the `.safetensors` files in `dir`, sorted so shards load in order.
fn discover_safetensors(dir: &Path) -> Result<Vec<PathBuf>, ModelError> {
    let entries = fs::read_dir(dir).map_err(|source| ModelError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ModelError::NoWeights(dir.to_path_buf()));
    }
    Ok(files)
}
