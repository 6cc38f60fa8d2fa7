//! Context store — live sessions and their lifecycle.
//!
//! Sessions live in memory while active. When a [`SessionStore`] is
//! attached, every mutation is written through and sessions that are not
//! in memory are loaded from it on first use. Persistence failures are
//! logged and never fail the request: the in-memory copy is authoritative.

use crate::context::assembler::turn_cost;
use crate::context::template::PromptTemplate;
use crate::context::token::TokenEstimator;
use chrono::{DateTime, Utc};
use localcoder_core::session::{Role, Session, SessionId, SessionStats, Turn};
use localcoder_core::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One-line description of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub turns: usize,
    pub total_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

pub struct ContextStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    persistence: Option<Arc<dyn SessionStore>>,
    estimator: TokenEstimator,
    template: PromptTemplate,
    max_history_turns: usize,
    idle_timeout: Duration,
}

impl ContextStore {
    pub fn new(
        estimator: TokenEstimator,
        template: PromptTemplate,
        max_history_turns: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            persistence: None,
            estimator,
            template,
            max_history_turns,
            idle_timeout,
        }
    }

    /// Attach a persistence backend.
    pub fn with_persistence(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    pub fn persistence_name(&self) -> Option<&str> {
        self.persistence.as_deref().map(|p| p.name())
    }

    /// Return a snapshot of the session, creating it if it does not exist.
    pub async fn open(&self, id: &SessionId) -> Session {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.touch();
            return session.clone();
        }

        let session = match self.load_persisted(id).await {
            Some(session) => session,
            None => {
                debug!(session = %id, "Creating new session");
                Session::new(id.clone(), self.max_history_turns)
            }
        };

        let mut sessions = self.sessions.write().await;
        // Another task may have created it while we were loading.
        let entry = sessions.entry(id.clone()).or_insert(session);
        entry.touch();
        entry.clone()
    }

    /// Append turns to a session (creating it if needed) and write through.
    ///
    /// Token counts are computed here, once, with the same rule the
    /// assembler uses.
    pub async fn record(&self, id: &SessionId, entries: &[(Role, &str)]) -> Vec<Turn> {
        if !self.sessions.read().await.contains_key(id) {
            self.open(id).await;
        }

        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(id.clone())
                .or_insert_with(|| Session::new(id.clone(), self.max_history_turns));
            for (role, text) in entries {
                let cost = turn_cost(&self.estimator, self.template, *role, text);
                session.push(Turn::new(*role, *text, cost));
            }
            session.clone()
        };

        self.persist(&snapshot).await;
        let appended = entries.len().min(snapshot.turns.len());
        snapshot.turns[snapshot.turns.len() - appended..].to_vec()
    }

    /// Full retained history, from memory or persistence.
    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Some(session.clone());
        }
        self.load_persisted(id).await
    }

    pub async fn history(&self, id: &SessionId) -> Option<Vec<Turn>> {
        self.get(id).await.map(|s| s.turns)
    }

    pub async fn stats(&self, id: &SessionId) -> Option<SessionStats> {
        self.get(id).await.map(|s| s.stats())
    }

    /// Case-insensitive substring search over a session's turns.
    pub async fn search(&self, id: &SessionId, query: &str) -> Option<Vec<Turn>> {
        self.get(id)
            .await
            .map(|s| s.search(query).into_iter().cloned().collect())
    }

    /// Destroy a session in memory and in persistence.
    pub async fn close(&self, id: &SessionId) -> bool {
        let in_memory = self.sessions.write().await.remove(id).is_some();
        let persisted = match &self.persistence {
            Some(store) => store.delete(id).await.unwrap_or_else(|e| {
                warn!(session = %id, error = %e, "Failed to delete persisted session");
                false
            }),
            None => false,
        };
        if in_memory || persisted {
            info!(session = %id, "Session closed");
        }
        in_memory || persisted
    }

    /// Summaries of the sessions currently held in memory, most recent first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                turns: s.turns.len(),
                total_tokens: s.total_tokens(),
                created_at: s.created_at,
                last_access: s.last_access,
            })
            .collect();
        summaries.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        summaries
    }

    /// Number of sessions held in memory.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than the configured timeout.
    pub async fn evict_idle(&self) -> usize {
        match chrono::Duration::from_std(self.idle_timeout) {
            Ok(timeout) => self.evict_idle_before(Utc::now() - timeout).await,
            // Too large to represent: nothing can be idle that long.
            Err(_) => 0,
        }
    }

    /// Drop sessions whose last access is older than `cutoff`. Persisted
    /// copies are kept, so an evicted session can be reopened later.
    pub async fn evict_idle_before(&self, cutoff: DateTime<Utc>) -> usize {
        let evicted: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let idle: Vec<SessionId> = sessions
                .values()
                .filter(|s| s.last_access < cutoff)
                .map(|s| s.id.clone())
                .collect();
            idle.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &evicted {
            self.persist(session).await;
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle sessions");
        }
        evicted.len()
    }

    async fn load_persisted(&self, id: &SessionId) -> Option<Session> {
        let store = self.persistence.as_ref()?;
        match store.load(id).await {
            Ok(Some(mut session)) => {
                // Counts may come from a different template or ratio.
                for turn in &mut session.turns {
                    turn.token_count =
                        turn_cost(&self.estimator, self.template, turn.role, &turn.text);
                }
                session.max_history_turns = self.max_history_turns;
                let keep_from = session.turns.len().saturating_sub(self.max_history_turns);
                session.turns.drain(..keep_from);
                debug!(session = %id, turns = session.turns.len(), "Session restored");
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(session = %id, error = %e, "Failed to load persisted session");
                None
            }
        }
    }

    async fn persist(&self, session: &Session) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.save(session).await {
                warn!(session = %session.id, error = %e, "Failed to persist session");
            }
        }
    }
}
