//! The context and inference coordination layer — the heart of LocalCoder.
//!
//! Many concurrent clients share one local model that can only serve one
//! generation at a time. This crate sits between them:
//!
//! 1. **Context** keeps each session's turns and fits them into the model's
//!    window ([`context`])
//! 2. **Cache** answers repeated prompts without touching the model ([`cache`])
//! 3. **Dispatch** queues generations FIFO in front of the single engine,
//!    with timeouts and cancellation ([`dispatch`])
//! 4. **Coordinator** drives one request through all of the above
//!    ([`coordinator`])

pub mod cache;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod maintenance;
pub mod request;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use cache::{CacheEntry, CacheStats, Fingerprint, ResponseCache};
pub use context::{
    AssembledPrompt, AssemblyError, AssemblyMetadata, ContextAssembler, ContextStore,
    PromptTemplate, SessionSummary, TokenBudget, TokenEstimator,
};
pub use coordinator::{
    AssistRequest, AssistResponse, Coordinator, CoordinatorOptions, CoordinatorStats,
    MaintenanceReport, persistence_from_config,
};
pub use dispatch::{
    CancelOutcome, Dispatcher, DispatcherStats, JobHandle, JobId, JobOutcome, JobState,
};
pub use maintenance::{DEFAULT_MAINTENANCE_INTERVAL, spawn_maintenance};
pub use request::{RequestKind, Task, TimeoutClass, normalize_prompt};
