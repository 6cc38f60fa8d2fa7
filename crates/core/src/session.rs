//! Session and Turn domain types.
//!
//! A session is the rolling conversation between one client and the
//! assistant: user prompt → assistant response → user prompt → ...
//! Turns are immutable once appended; the token count is computed once, at
//! insertion, by whoever owns the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One message in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Estimated token cost of this turn as rendered into a prompt.
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>, token_count: usize) -> Self {
        Self {
            role,
            text: text.into(),
            token_count,
            timestamp: Utc::now(),
        }
    }
}

/// An ordered log of turns plus lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Upper bound on retained turns; older turns are discarded on append.
    pub max_history_turns: usize,
}

impl Session {
    pub fn new(id: SessionId, max_history_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            turns: Vec::new(),
            created_at: now,
            last_access: now,
            max_history_turns,
        }
    }

    /// Append a turn, dropping the oldest turns beyond `max_history_turns`.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.turns.len() > self.max_history_turns {
            let excess = self.turns.len() - self.max_history_turns;
            self.turns.drain(..excess);
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.token_count).sum()
    }

    /// Summary statistics over the retained turns.
    pub fn stats(&self) -> SessionStats {
        let exchanges = self.turns.iter().filter(|t| t.role == Role::User).count();
        let user_chars: usize = self
            .turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.text.chars().count())
            .sum();
        let assistant_chars: usize = self
            .turns
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .map(|t| t.text.chars().count())
            .sum();
        let duration_secs = match (self.turns.first(), self.turns.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_seconds().max(0),
            _ => 0,
        };

        SessionStats {
            turns: self.turns.len(),
            exchanges,
            total_tokens: self.total_tokens(),
            user_chars,
            assistant_chars,
            duration_secs,
        }
    }

    /// Case-insensitive substring search over turn text.
    pub fn search(&self, query: &str) -> Vec<&Turn> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.turns
            .iter()
            .filter(|t| t.text.to_lowercase().contains(&query))
            .collect()
    }
}

/// Aggregate numbers describing a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub turns: usize,
    /// Number of user turns (each one opened an exchange).
    pub exchanges: usize,
    pub total_tokens: usize,
    pub user_chars: usize,
    pub assistant_chars: usize,
    /// Seconds between the first and last retained turn.
    pub duration_secs: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_enforces_history_bound() {
        let mut session = Session::new(SessionId::from("s"), 3);
        for i in 0..5 {
            session.push(Turn::new(Role::User, format!("msg {i}"), 1));
        }
        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns[0].text, "msg 2");
        assert_eq!(session.turns[2].text, "msg 4");
    }

    #[test]
    fn stats_count_roles() {
        let mut session = Session::new(SessionId::from("s"), 10);
        session.push(Turn::new(Role::User, "hello", 2));
        session.push(Turn::new(Role::Assistant, "hi there", 3));
        let stats = session.stats();
        assert_eq!(stats.turns, 2);
        assert_eq!(stats.exchanges, 1);
        assert_eq!(stats.total_tokens, 5);
        assert_eq!(stats.user_chars, 5);
        assert_eq!(stats.assistant_chars, 8);
    }

    #[test]
    fn search_is_case_insensitive() {
        let mut session = Session::new(SessionId::from("s"), 10);
        session.push(Turn::new(Role::User, "How do I parse JSON in Rust?", 8));
        session.push(Turn::new(Role::Assistant, "Use serde_json.", 4));
        assert_eq!(session.search("json").len(), 2);
        assert_eq!(session.search("SERDE").len(), 1);
        assert!(session.search("   ").is_empty());
    }

    #[test]
    fn session_id_is_transparent_in_json() {
        let id = SessionId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
