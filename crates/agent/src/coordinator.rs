//! The coordinator — one entry point for every assistant request.
//!
//! Request flow:
//!
//! 1. **Normalize** the user's text; reject it if nothing is left
//! 2. **Lock** the session so same-session requests run one at a time
//! 3. **Assemble** preamble + history + prompt within the token budget
//! 4. **Fingerprint** the assembled prompt and check the response cache
//! 5. **Dispatch** to the single inference worker on a miss
//! 6. **Record** the user turn always, the assistant turn on success only
//!
//! Every failure below this layer comes back as a [`CoordinatorError`].

use crate::cache::{CacheEntry, CacheStats, Fingerprint, ResponseCache};
use crate::context::{
    ContextAssembler, ContextStore, PromptTemplate, SessionSummary, TokenBudget, TokenEstimator,
};
use crate::dispatch::{Dispatcher, DispatcherStats};
use crate::request::{RequestKind, Task, TimeoutClass, normalize_prompt};
use localcoder_config::AppConfig;
use localcoder_core::engine::{GenerationParams, InferenceEngine, TokenUsage};
use localcoder_core::error::{CoordinatorError, Error, StorageError};
use localcoder_core::session::{Role, SessionId, SessionStats, Turn};
use localcoder_core::store::SessionStore;
use localcoder_memory::{FileSessionStore, InMemorySessionStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistRequest {
    /// Omit to start a new session.
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl AssistRequest {
    pub fn new(session_id: Option<SessionId>, task: Task) -> Self {
        Self {
            session_id,
            task,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// The answer to an [`AssistRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistResponse {
    pub session_id: SessionId,
    pub kind: RequestKind,
    pub response_text: String,
    pub token_usage: TokenUsage,
    pub cache_hit: bool,
    pub latency_ms: u64,
    pub turns_in_context: usize,
    pub turns_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub live_sessions: usize,
    pub cache: CacheStats,
    pub dispatcher: DispatcherStats,
}

/// What one maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub sessions_evicted: usize,
    pub cache_expired: usize,
}

/// Knobs that do not belong to any one component.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub base_params: GenerationParams,
    pub chat_timeout: Duration,
    pub code_timeout: Duration,
    /// Replaces the built-in chat preamble.
    pub chat_preamble: Option<String>,
    pub cache_snapshot: Option<PathBuf>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            base_params: GenerationParams::default(),
            chat_timeout: Duration::from_secs(120),
            code_timeout: Duration::from_secs(300),
            chat_preamble: None,
            cache_snapshot: None,
        }
    }
}

pub struct Coordinator {
    store: ContextStore,
    assembler: ContextAssembler,
    cache: ResponseCache,
    dispatcher: Dispatcher,
    options: CoordinatorOptions,
    session_locks: std::sync::Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl Coordinator {
    pub fn new(
        store: ContextStore,
        assembler: ContextAssembler,
        cache: ResponseCache,
        dispatcher: Dispatcher,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            store,
            assembler,
            cache,
            dispatcher,
            options,
            session_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Wire every component from configuration. Spawns the dispatcher
    /// worker, so this must run inside a tokio runtime.
    pub fn from_config(
        config: &AppConfig,
        engine: Box<dyn InferenceEngine>,
        persistence: Option<Arc<dyn SessionStore>>,
    ) -> Result<Self, Error> {
        let template: PromptTemplate = config
            .model
            .template
            .parse()
            .map_err(|message| Error::Config { message })?;
        let estimator = TokenEstimator::new(config.model.chars_per_token);
        let ctx = &config.context;

        let mut store = ContextStore::new(
            estimator,
            template,
            ctx.max_history_turns,
            ctx.session_idle_timeout(),
        );
        if let Some(backend) = persistence {
            store = store.with_persistence(backend);
        }

        let assembler = ContextAssembler::new(
            estimator,
            template,
            TokenBudget {
                max_context_tokens: ctx.max_context_tokens,
                reserved_output_tokens: ctx.reserved_output_tokens,
            },
            ctx.max_history_turns,
        );

        let cache = if config.cache.enabled {
            ResponseCache::new(config.cache.cache_capacity, config.cache.ttl())
        } else {
            ResponseCache::disabled()
        };
        if let Some(path) = &config.cache.snapshot_path {
            if let Err(e) = cache.load_snapshot(path) {
                warn!(path = %path.display(), error = %e, "Could not restore response cache");
            }
        }

        let options = CoordinatorOptions {
            base_params: GenerationParams {
                max_tokens: config.generation.max_tokens,
                temperature: config.generation.temperature,
                stop_sequences: config.generation.stop_sequences.clone(),
            },
            chat_timeout: config.dispatcher.inference_timeout(),
            code_timeout: config.dispatcher.code_inference_timeout(),
            chat_preamble: ctx.system_preamble.clone(),
            cache_snapshot: config.cache.snapshot_path.clone(),
        };

        let dispatcher = Dispatcher::spawn(engine, config.dispatcher.engine_retries);
        info!(
            model = %dispatcher.model_id(),
            template = %template,
            max_context_tokens = ctx.max_context_tokens,
            cache_enabled = config.cache.enabled,
            persistence = store.persistence_name().unwrap_or("none"),
            "Coordinator ready"
        );

        Ok(Self::new(store, assembler, cache, dispatcher, options))
    }

    pub fn model_id(&self) -> &str {
        self.dispatcher.model_id()
    }

    pub fn is_available(&self) -> bool {
        self.dispatcher.is_running()
    }

    // ── Requests ──────────────────────────────────────────────────────────

    pub async fn handle(&self, request: AssistRequest) -> Result<AssistResponse, CoordinatorError> {
        let started = Instant::now();
        let task = &request.task;

        let primary = normalize_prompt(task.primary_text());
        if primary.is_empty() {
            return Err(CoordinatorError::EmptyPrompt);
        }

        let session_id = request.session_id.clone().unwrap_or_default();
        let lock = self.session_lock(&session_id);
        let _guard = lock.lock().await;

        // Nothing is created until a turn is recorded, so a rejected prompt
        // leaves no empty session behind.
        let history = self
            .store
            .get(&session_id)
            .await
            .map(|s| s.turns)
            .unwrap_or_default();
        let user_text = task.user_prompt(&primary);
        let preamble = task.system_preamble(self.options.chat_preamble.as_deref());
        let params = self.params_for(&request);

        let assembled = self
            .assembler
            .assemble(&preamble, &history, &user_text)?;
        let meta = assembled.metadata.clone();
        let fingerprint = Fingerprint::compute(&assembled.text, self.dispatcher.model_id(), &params);

        debug!(
            session = %session_id,
            kind = %task.kind(),
            prompt_tokens = meta.prompt_tokens,
            turns_included = meta.turns_included,
            turns_dropped = meta.turns_dropped,
            fingerprint = %fingerprint.short(),
            "Context assembled"
        );

        let respond = |text: String, usage: TokenUsage, cache_hit: bool| AssistResponse {
            session_id: session_id.clone(),
            kind: task.kind(),
            response_text: text,
            token_usage: usage,
            cache_hit,
            latency_ms: started.elapsed().as_millis() as u64,
            turns_in_context: meta.turns_included,
            turns_dropped: meta.turns_dropped,
        };

        if let Some(hit) = self.cache.get(&fingerprint) {
            self.store
                .record(
                    &session_id,
                    &[
                        (Role::User, user_text.as_str()),
                        (Role::Assistant, hit.response_text.as_str()),
                    ],
                )
                .await;
            info!(session = %session_id, kind = %task.kind(), "Served from cache");
            return Ok(respond(hit.response_text, hit.usage, true));
        }

        let timeout = match task.timeout_class() {
            TimeoutClass::Chat => self.options.chat_timeout,
            TimeoutClass::Code => self.options.code_timeout,
        };

        let outcome = match self.dispatcher.submit(assembled.text, params, timeout) {
            Ok(mut handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        let generation = match outcome {
            Ok(outcome) if outcome.cancel_requested => {
                self.record_user_only(&session_id, &user_text).await;
                debug!(session = %session_id, "Discarding generation that finished after cancel");
                return Err(CoordinatorError::Cancelled);
            }
            Ok(outcome) => outcome.generation,
            Err(e) => {
                self.record_user_only(&session_id, &user_text).await;
                let err = CoordinatorError::from(e);
                warn!(session = %session_id, kind = err.kind(), error = %err, "Request failed");
                return Err(err);
            }
        };

        let text = task.post_process(&generation.text);
        if text.is_empty() {
            self.record_user_only(&session_id, &user_text).await;
            warn!(session = %session_id, "Engine returned an empty response");
            return Err(CoordinatorError::GenerationFailed(
                "engine returned an empty response".into(),
            ));
        }

        self.store
            .record(
                &session_id,
                &[(Role::User, user_text.as_str()), (Role::Assistant, text.as_str())],
            )
            .await;
        self.cache
            .put(fingerprint, CacheEntry::new(text.clone(), generation.usage));

        let response = respond(text, generation.usage, false);
        info!(
            session = %session_id,
            kind = %task.kind(),
            latency_ms = response.latency_ms,
            completion_tokens = generation.usage.completion_tokens,
            "Request completed"
        );
        Ok(response)
    }

    pub async fn chat(
        &self,
        session_id: &SessionId,
        message: impl Into<String>,
    ) -> Result<AssistResponse, CoordinatorError> {
        self.handle(AssistRequest::new(Some(session_id.clone()), Task::chat(message)))
            .await
    }

    pub async fn code(
        &self,
        session_id: &SessionId,
        prompt: impl Into<String>,
        language: Option<String>,
        template: Option<String>,
    ) -> Result<AssistResponse, CoordinatorError> {
        let task = Task::Code {
            prompt: prompt.into(),
            language,
            template,
        };
        self.handle(AssistRequest::new(Some(session_id.clone()), task))
            .await
    }

    pub async fn explain(
        &self,
        session_id: &SessionId,
        code: impl Into<String>,
        language: Option<String>,
    ) -> Result<AssistResponse, CoordinatorError> {
        let task = Task::Explain {
            code: code.into(),
            language,
        };
        self.handle(AssistRequest::new(Some(session_id.clone()), task))
            .await
    }

    pub async fn debug(
        &self,
        session_id: &SessionId,
        code: impl Into<String>,
        language: Option<String>,
        error_message: Option<String>,
    ) -> Result<AssistResponse, CoordinatorError> {
        let task = Task::Debug {
            code: code.into(),
            language,
            error_message,
        };
        self.handle(AssistRequest::new(Some(session_id.clone()), task))
            .await
    }

    fn params_for(&self, request: &AssistRequest) -> GenerationParams {
        let mut base = self.options.base_params.clone();
        if let Some(max_tokens) = request.max_tokens {
            base.max_tokens = max_tokens.max(1);
        }
        if let Some(temperature) = request.temperature {
            base.temperature = temperature.clamp(0.0, 2.0);
        }
        request.task.adjust_params(&base)
    }

    async fn record_user_only(&self, session_id: &SessionId, user_text: &str) {
        self.store.record(session_id, &[(Role::User, user_text)]).await;
    }

    fn session_lock(&self, id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    // ── Sessions ──────────────────────────────────────────────────────────

    pub async fn history(&self, id: &SessionId) -> Result<Vec<Turn>, CoordinatorError> {
        self.store
            .history(id)
            .await
            .ok_or_else(|| CoordinatorError::SessionNotFound(id.to_string()))
    }

    pub async fn session_stats(&self, id: &SessionId) -> Result<SessionStats, CoordinatorError> {
        self.store
            .stats(id)
            .await
            .ok_or_else(|| CoordinatorError::SessionNotFound(id.to_string()))
    }

    pub async fn search(
        &self,
        id: &SessionId,
        query: &str,
    ) -> Result<Vec<Turn>, CoordinatorError> {
        self.store
            .search(id, query)
            .await
            .ok_or_else(|| CoordinatorError::SessionNotFound(id.to_string()))
    }

    /// Destroy a session. Waits for an in-flight request on it to finish.
    pub async fn close(&self, id: &SessionId) -> Result<(), CoordinatorError> {
        let lock = self.session_lock(id);
        let closed = {
            let _guard = lock.lock().await;
            self.store.close(id).await
        };
        self.prune_session_locks();
        if closed {
            Ok(())
        } else {
            Err(CoordinatorError::SessionNotFound(id.to_string()))
        }
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.store.list().await
    }

    pub async fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            live_sessions: self.store.len().await,
            cache: self.cache.stats(),
            dispatcher: self.dispatcher.stats(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    // ── Maintenance ───────────────────────────────────────────────────────

    /// Evict idle sessions and expired cache entries.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let report = MaintenanceReport {
            sessions_evicted: self.store.evict_idle().await,
            cache_expired: self.cache.evict(),
        };
        self.prune_session_locks();
        if report != MaintenanceReport::default() {
            info!(
                sessions_evicted = report.sessions_evicted,
                cache_expired = report.cache_expired,
                "Maintenance pass"
            );
        }
        report
    }

    /// Write the response cache to its configured snapshot file, if any.
    pub fn save_cache_snapshot(&self) -> Result<Option<usize>, StorageError> {
        match &self.options.cache_snapshot {
            Some(path) => self.cache.save_snapshot(path).map(Some),
            None => Ok(None),
        }
    }

    /// Forget locks nobody is holding or waiting on.
    fn prune_session_locks(&self) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Build the session persistence backend named in the configuration.
pub fn persistence_from_config(config: &AppConfig) -> Result<Arc<dyn SessionStore>, Error> {
    match config.persistence.backend.as_str() {
        "memory" => Ok(Arc::new(InMemorySessionStore::new())),
        "file" => {
            let dir = config.persistence.sessions_dir();
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Storage(StorageError::Io(format!(
                    "Failed to create sessions directory {}: {e}",
                    dir.display()
                )))
            })?;
            Ok(Arc::new(FileSessionStore::new(dir)))
        }
        other => Err(Error::Config {
            message: format!("unknown persistence backend '{other}'"),
        }),
    }
}
