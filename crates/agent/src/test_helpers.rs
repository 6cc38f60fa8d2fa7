//! Shared test helpers: a scripted inference engine.

use async_trait::async_trait;
use localcoder_core::engine::{AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage};
use localcoder_core::error::EngineError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock does on one `generate` call.
#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    /// Reply after a delay, bailing out early if aborted.
    Delay(Duration, String),
    /// Never finish on its own; returns `Aborted` once the signal is set.
    Hang,
    /// Reply after a delay regardless of the abort signal.
    IgnoreAbort(Duration, String),
    Fail(EngineError),
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<String>>,
    resets: AtomicUsize,
    in_flight: AtomicUsize,
    max_concurrency: AtomicUsize,
}

/// A mock engine that plays back scripted behaviours in order.
///
/// Once the script runs out it echoes the prompt back after
/// `echo_delay`.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
    echo_delay: Duration,
}

impl MockEngine {
    pub fn new(scripts: Vec<Script>) -> Self {
        let engine = Self::default();
        *engine.state.scripts.lock().unwrap() = scripts.into();
        engine
    }

    pub fn echo_after(delay: Duration) -> Self {
        Self {
            echo_delay: delay,
            ..Self::default()
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.state.prompts.lock().unwrap().len()
    }

    pub fn resets(&self) -> usize {
        self.state.resets.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.state.max_concurrency.load(Ordering::SeqCst)
    }

    async fn play(&self, prompt: &str, abort: &AbortSignal) -> Result<String, EngineError> {
        let script = self.state.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Reply(text)) => Ok(text),
            Some(Script::Delay(delay, text)) => {
                sleep_unless_aborted(delay, abort).await?;
                Ok(text)
            }
            Some(Script::Hang) => loop {
                sleep_unless_aborted(Duration::from_secs(3600), abort).await?;
            },
            Some(Script::IgnoreAbort(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Script::Fail(e)) => Err(e),
            None => {
                sleep_unless_aborted(self.echo_delay, abort).await?;
                Ok(prompt.to_string())
            }
        }
    }
}

async fn sleep_unless_aborted(total: Duration, abort: &AbortSignal) -> Result<(), EngineError> {
    let deadline = tokio::time::Instant::now() + total;
    while tokio::time::Instant::now() < deadline {
        if abort.is_aborted() {
            return Err(EngineError::Aborted);
        }
        let step = deadline
            .saturating_duration_since(tokio::time::Instant::now())
            .min(Duration::from_millis(5));
        tokio::time::sleep(step).await;
    }
    if abort.is_aborted() {
        return Err(EngineError::Aborted);
    }
    Ok(())
}

#[async_trait]
impl InferenceEngine for MockEngine {
    fn model_id(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        abort: AbortSignal,
    ) -> Result<Generation, EngineError> {
        self.state.prompts.lock().unwrap().push(prompt.to_string());
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_concurrency.fetch_max(now, Ordering::SeqCst);

        let result = self.play(prompt, &abort).await;

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result.map(|text| Generation {
            usage: TokenUsage::new(prompt.len() / 4, text.len() / 4),
            text,
        })
    }

    async fn reset(&self) -> Result<(), EngineError> {
        self.state.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
