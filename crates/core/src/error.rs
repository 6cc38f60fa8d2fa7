//! Error types for the LocalCoder domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the coordinator folds
//! everything below it into a [`CoordinatorError`].

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for LocalCoder operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures raised by an inference engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation aborted")]
    Aborted,

    #[error("Engine reset failed: {0}")]
    ResetFailed(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of a session persistence backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Corrupted record for '{key}': {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Which phase of a job ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Queued,
    Running,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Terminal failure of an inference job.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Job timed out while {phase} after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    #[error("Engine failed after {attempts} attempt(s): {source}")]
    Engine {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Dispatcher is shut down")]
    Shutdown,
}

/// Structured failure returned by the coordinator to its callers.
#[derive(Debug, Clone, Error)]
pub enum CoordinatorError {
    #[error("Prompt is empty after normalization")]
    EmptyPrompt,

    #[error(
        "Context too large: preamble ({preamble_tokens} tokens) + prompt ({prompt_tokens} tokens) exceed budget ({budget} tokens)"
    )]
    ContextTooLarge {
        preamble_tokens: usize,
        prompt_tokens: usize,
        budget: usize,
    },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Inference timed out while {phase} after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Inference service unavailable")]
    Unavailable,

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl CoordinatorError {
    /// Stable machine-readable name for the error variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPrompt => "empty_prompt",
            Self::ContextTooLarge { .. } => "context_too_large",
            Self::GenerationFailed(_) => "generation_failed",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
            Self::SessionNotFound(_) => "session_not_found",
        }
    }
}

impl From<DispatchError> for CoordinatorError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Timeout { phase, after } => Self::Timeout { phase, after },
            DispatchError::Engine { source, .. } => Self::GenerationFailed(source.to_string()),
            DispatchError::Cancelled => Self::Cancelled,
            DispatchError::Shutdown => Self::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failure_maps_to_generation_failed() {
        let err: CoordinatorError = DispatchError::Engine {
            attempts: 2,
            source: EngineError::Generation("tensor shape mismatch".into()),
        }
        .into();
        assert_eq!(err.kind(), "generation_failed");
        assert!(err.to_string().contains("tensor shape mismatch"));
    }

    #[test]
    fn timeout_displays_phase() {
        let err = DispatchError::Timeout {
            phase: TimeoutPhase::Running,
            after: Duration::from_secs(3),
        };
        assert!(err.to_string().contains("running"));
        let err: CoordinatorError = err.into();
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn context_too_large_mentions_budget() {
        let err = Error::Coordinator(CoordinatorError::ContextTooLarge {
            preamble_tokens: 10,
            prompt_tokens: 90,
            budget: 40,
        });
        assert!(err.to_string().contains("40 tokens"));
    }
}
