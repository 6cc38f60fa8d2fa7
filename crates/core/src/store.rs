//! SessionStore trait — durable storage for conversation sessions.
//!
//! The in-process context store keeps live sessions in memory; a
//! `SessionStore` lets them survive restarts and idle eviction.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::session::{Session, SessionId};

/// The persistence trait.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Human-readable backend name (for logs and status output).
    fn name(&self) -> &str;

    /// Load a session. Returns `Ok(None)` when no record exists.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StorageError>;

    /// Insert or replace a session.
    async fn save(&self, session: &Session) -> Result<(), StorageError>;

    /// Delete a session. Returns `true` if something was removed.
    async fn delete(&self, id: &SessionId) -> Result<bool, StorageError>;

    /// List the ids of all stored sessions.
    async fn list(&self) -> Result<Vec<SessionId>, StorageError>;
}
