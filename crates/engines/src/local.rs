//! In-process inference engine: runs GGUF-quantized models on the CPU.
//!
//! Uses [Candle](https://github.com/huggingface/candle) (Rust-native ML), so
//! no internet is needed once the weights are cached. The prompt arrives
//! fully templated; this engine only tokenizes, samples, and decodes.
//!
//! ```bash
//! localcoder chat --model deepseek-coder
//! localcoder chat --model /path/to/model.gguf
//! ```

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use localcoder_core::engine::{AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage};
use localcoder_core::error::EngineError;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::presets::{preset_names, resolve_preset};

/// Fixed seed so identical requests sample identically.
const SAMPLING_SEED: u64 = 42;

/// Tokenizer used when a bare GGUF file has no `tokenizer.json` beside it.
const FALLBACK_TOKENIZER_REPO: &str = "deepseek-ai/deepseek-coder-1.3b-instruct";

/// Runs a GGUF model locally via Candle.
///
/// The model sits behind a Mutex; the dispatcher already guarantees a
/// single caller, the lock only guards lazy loading and `reset`.
pub struct LocalEngine {
    inner: Arc<Mutex<Option<LocalModelState>>>,
    model_name: String,
}

/// The loaded model state (tokenizer + weights).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
    /// Cleared when a forward pass fails; `reset` reloads the weights.
    healthy: bool,
}

impl LocalEngine {
    /// Create a new local engine.
    ///
    /// `model_name` can be a preset alias (`"deepseek-coder"`,
    /// `"tinyllama"`) or a path to a `.gguf` file. The model is loaded lazily
    /// on the first request.
    pub fn new(model_name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            model_name: model_name.to_string(),
        }
    }

    /// Eagerly load the model (downloads if needed, then loads into memory).
    pub fn load(model_name: &str) -> Result<Self, EngineError> {
        let state = LocalModelState::load(model_name)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(Some(state))),
            model_name: model_name.to_string(),
        })
    }

    async fn ensure_loaded(&self) -> Result<(), EngineError> {
        let mut state = self.inner.lock().await;
        if state.as_ref().is_some_and(|s| s.healthy) {
            return Ok(());
        }

        info!(model = %self.model_name, "Loading local model");
        let name = self.model_name.clone();
        let loaded = tokio::task::spawn_blocking(move || LocalModelState::load(&name))
            .await
            .map_err(|e| EngineError::NotConfigured(format!("Model loading task failed: {e}")))??;
        *state = Some(loaded);
        Ok(())
    }
}

impl LocalModelState {
    /// Load a model by preset name or path.
    fn load(model_name: &str) -> Result<Self, EngineError> {
        let device = Device::Cpu;

        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), &device);
        }

        let preset = resolve_preset(model_name).ok_or_else(|| {
            EngineError::ModelNotFound(format!(
                "Unknown local model '{model_name}'. Available presets: {}. \
                 Or provide a path to a .gguf file.",
                preset_names()
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        let api = Api::new().map_err(|e| {
            EngineError::Network(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let model_path = api
            .model(preset.repo.to_string())
            .get(preset.gguf_file)
            .map_err(|e| {
                EngineError::Network(format!(
                    "Failed to download model '{}' from '{}': {e}",
                    preset.gguf_file, preset.repo
                ))
            })?;

        let tokenizer_path = api
            .model(preset.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .map_err(|e| {
                EngineError::Network(format!(
                    "Failed to download tokenizer from '{}': {e}",
                    preset.tokenizer_repo
                ))
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::NotConfigured(format!("Failed to load tokenizer: {e}")))?;

        Self::from_parts(&model_path, tokenizer, device)
    }

    /// Load from an explicit GGUF file path.
    fn load_from_path(path: &Path, device: &Device) -> Result<Self, EngineError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let tokenizer_path = path.with_file_name("tokenizer.json");
        let tokenizer = if tokenizer_path.exists() {
            Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| EngineError::NotConfigured(format!("Failed to load tokenizer: {e}")))?
        } else {
            warn!(
                repo = FALLBACK_TOKENIZER_REPO,
                "No tokenizer.json next to GGUF file, downloading fallback tokenizer"
            );
            let api = Api::new()
                .map_err(|e| EngineError::Network(format!("HuggingFace Hub API error: {e}")))?;
            let tok_path = api
                .model(FALLBACK_TOKENIZER_REPO.to_string())
                .get("tokenizer.json")
                .map_err(|e| {
                    EngineError::Network(format!("Failed to download fallback tokenizer: {e}"))
                })?;
            Tokenizer::from_file(&tok_path)
                .map_err(|e| EngineError::NotConfigured(format!("Failed to load tokenizer: {e}")))?
        };

        Self::from_parts(path, tokenizer, device.clone())
    }

    fn from_parts(model_path: &Path, tokenizer: Tokenizer, device: Device) -> Result<Self, EngineError> {
        let mut file = std::fs::File::open(model_path)
            .map_err(|e| EngineError::NotConfigured(format!("Failed to open model file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::NotConfigured(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| EngineError::NotConfigured(format!("Failed to load model weights: {e}")))?;

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|EOT|>"))
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .unwrap_or(2);

        info!(eos_token_id, "Local model loaded");

        Ok(Self {
            model,
            tokenizer,
            device,
            eos_token_id,
            healthy: true,
        })
    }

    /// Tokenize → sample until EOS, a stop sequence, `max_tokens`, or abort.
    fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        abort: &AbortSignal,
    ) -> Result<Generation, EngineError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| EngineError::Generation(format!("Tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids().to_vec();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            "Starting local generation"
        );

        let mut logits_processor = if params.temperature <= 0.0 {
            LogitsProcessor::new(SAMPLING_SEED, None, None)
        } else {
            LogitsProcessor::new(SAMPLING_SEED, Some(params.temperature as f64), None)
        };

        let mut generated: Vec<u32> = Vec::new();
        let mut text = String::new();
        let mut input = prompt_tokens.clone();
        let mut index_pos = 0;

        for _ in 0..params.max_tokens {
            if abort.is_aborted() {
                debug!(generated = generated.len(), "Generation aborted");
                return Err(EngineError::Aborted);
            }

            let next_token = self.step(&input, index_pos, &mut logits_processor)?;
            index_pos += input.len();

            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);
            input = vec![next_token];

            text = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| EngineError::Generation(format!("Detokenization failed: {e}")))?;

            if let Some(cut) = find_stop(&text, &params.stop_sequences) {
                text.truncate(cut);
                break;
            }
        }

        debug!(completion_tokens = generated.len(), "Generation complete");

        Ok(Generation {
            text: text.trim().to_string(),
            usage: TokenUsage::new(prompt_tokens.len(), generated.len()),
        })
    }

    /// One forward pass; marks the state unhealthy on tensor errors.
    fn step(
        &mut self,
        input: &[u32],
        index_pos: usize,
        logits_processor: &mut LogitsProcessor,
    ) -> Result<u32, EngineError> {
        let result = (|| -> candle_core::Result<u32> {
            let tensor = Tensor::new(input, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&tensor, index_pos)?;
            let logits = logits.squeeze(0)?;
            logits_processor.sample(&logits)
        })();

        result.map_err(|e| {
            self.healthy = false;
            EngineError::Generation(format!("Candle inference error: {e}"))
        })
    }
}

/// Byte offset of the earliest stop sequence in `text`.
fn find_stop(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

// ── Engine trait implementation ────────────────────────────────────────

#[async_trait]
impl InferenceEngine for LocalEngine {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        abort: AbortSignal,
    ) -> Result<Generation, EngineError> {
        self.ensure_loaded().await?;

        let inner = self.inner.clone();
        let prompt = prompt.to_string();
        let params = params.clone();

        // Candle is CPU-bound; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.blocking_lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| EngineError::NotConfigured("model is not loaded".into()))?;
            state.generate(&prompt, &params, &abort)
        })
        .await
        .map_err(|e| EngineError::Generation(format!("Inference task panicked: {e}")))?
    }

    async fn reset(&self) -> Result<(), EngineError> {
        // Acquiring the lock waits for an abandoned blocking generation to
        // observe its abort flag and exit.
        let mut state = self.inner.lock().await;
        if state.as_ref().is_some_and(|s| !s.healthy) {
            warn!(model = %self.model_name, "Dropping unhealthy model state");
            *state = None;
        }
        drop(state);
        self.ensure_loaded()
            .await
            .map_err(|e| EngineError::ResetFailed(e.to_string()))
    }
}
