//! InferenceEngine trait — the abstraction over local model backends.
//!
//! An engine turns a fully templated prompt string into a completion. It is
//! NOT safe for concurrent use: the dispatcher owns exactly one engine and
//! serializes every call through a single worker.
//!
//! Implementations: in-process Candle (GGUF), llama.cpp server over HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Sampling and termination parameters for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum tokens to generate
    pub max_tokens: usize,

    /// Temperature (0.0 = greedy, higher = more creative)
    pub temperature: f32,

    /// Generation stops as soon as the output ends with any of these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            stop_sequences: default_stop_sequences(),
        }
    }
}

/// Markers that end a turn for the small instruct models we target.
pub fn default_stop_sequences() -> Vec<String> {
    vec!["</s>".into(), "Human:".into(), "Assistant:".into()]
}

/// Token usage reported for a single generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Cooperative cancellation flag shared between the dispatcher and an engine.
///
/// Engines poll [`AbortSignal::is_aborted`] between decoding steps and bail
/// out with [`EngineError::Aborted`] once it is set.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The core inference trait.
///
/// Every backend implements this trait. The dispatcher calls
/// `generate()` and never touches backend-specific details.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Identifier of the loaded model (part of the cache key).
    fn model_id(&self) -> &str;

    /// Produce a completion for an already templated prompt.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        abort: AbortSignal,
    ) -> Result<Generation, EngineError>;

    /// Return the engine to a clean state after a failed or abandoned call.
    async fn reset(&self) -> Result<(), EngineError>;

    /// Check if the engine is ready to serve requests.
    async fn health_check(&self) -> Result<bool, EngineError> {
        Ok(true)
    }
}
