//! # LocalCoder Core
//!
//! Domain types, traits, and error definitions for the LocalCoder offline
//! coding assistant. This crate has **no runtime dependencies**: it defines
//! the domain model that the engine, storage, and coordination crates
//! implement against.
//!
//! Every swappable subsystem is a trait here:
//! - [`InferenceEngine`]: a local model backend
//! - [`SessionStore`]: durable session persistence

pub mod engine;
pub mod error;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use engine::{
    AbortSignal, Generation, GenerationParams, InferenceEngine, TokenUsage,
    default_stop_sequences,
};
pub use error::{
    CoordinatorError, DispatchError, EngineError, Error, Result, StorageError, TimeoutPhase,
};
pub use session::{Role, Session, SessionId, SessionStats, Turn};
pub use store::SessionStore;
