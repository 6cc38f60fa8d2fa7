//! File-based session store — one JSON document per session.
//!
//! Storage location: `~/.localcoder/sessions/<session-id>.json`
//!
//! Files are human-inspectable and written atomically (temp file + rename).
//! A file that fails to parse is logged and treated as absent, so a single
//! damaged session never prevents the assistant from starting.

use async_trait::async_trait;
use localcoder_core::error::StorageError;
use localcoder_core::session::{Session, SessionId};
use localcoder_core::store::SessionStore;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = "json";

pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session ids become file names, so only a conservative alphabet is
    /// accepted.
    fn path_for(&self, id: &SessionId) -> Result<PathBuf, StorageError> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::Io(format!(
                "session id '{raw}' is not usable as a file name"
            )));
        }
        Ok(self.dir.join(format!("{raw}.{EXTENSION}")))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StorageError> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::Io(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        match decode(id, &content) {
            Ok(session) => {
                debug!(session = %id, turns = session.turns.len(), "Session loaded from disk");
                Ok(Some(session))
            }
            Err(e @ StorageError::Corrupted { .. }) => {
                warn!(session = %id, error = %e, "Skipping corrupted session file");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), StorageError> {
        let path = self.path_for(&session.id)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            StorageError::Io(format!("Failed to create session directory: {e}"))
        })?;

        let content = serde_json::to_string_pretty(session)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to write session file: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::Io(format!("Failed to replace session file: {e}")))?;

        Ok(())
    }

    async fn delete(&self, id: &SessionId) -> Result<bool, StorageError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<SessionId>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(SessionId::from(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Parse a session document, checking it belongs to `id`.
fn decode(id: &SessionId, content: &str) -> Result<Session, StorageError> {
    let session: Session =
        serde_json::from_str(content).map_err(|e| StorageError::Corrupted {
            key: id.to_string(),
            reason: e.to_string(),
        })?;
    if session.id != *id {
        return Err(StorageError::Corrupted {
            key: id.to_string(),
            reason: format!("file holds session '{}'", session.id),
        });
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use localcoder_core::session::{Role, Turn};

    fn session_with_turns(id: &str) -> Session {
        let mut session = Session::new(SessionId::from(id), 20);
        session.push(Turn::new(Role::User, "Write a binary search", 6));
        session.push(Turn::new(Role::Assistant, "fn search() {}", 4));
        session
    }

    #[tokio::test]
    async fn save_and_reload_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.save(&session_with_turns("s1")).await.unwrap();

        assert!(dir.path().join("s1.json").exists());

        // A second store over the same directory sees the session
        let store2 = FileSessionStore::new(dir.path());
        let loaded = store2.load(&SessionId::from("s1")).await.unwrap().unwrap();
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[1].role, Role::Assistant);
        assert_eq!(loaded.turns[0].token_count, 6);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("not-created"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load(&SessionId::from("x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_file_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load(&SessionId::from("broken")).await.unwrap().is_none());
    }

    #[test]
    fn decode_reports_corruption() {
        let id = SessionId::from("s1");
        assert!(matches!(
            decode(&id, "{ not json"),
            Err(StorageError::Corrupted { key, .. }) if key == "s1"
        ));

        let other = serde_json::to_string(&session_with_turns("s2")).unwrap();
        assert!(matches!(
            decode(&id, &other),
            Err(StorageError::Corrupted { reason, .. }) if reason.contains("s2")
        ));
    }

    #[tokio::test]
    async fn mismatched_id_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let other = serde_json::to_string(&session_with_turns("other")).unwrap();
        std::fs::write(dir.path().join("mine.json"), other).unwrap();
        let store = FileSessionStore::new(dir.path());
        assert!(store.load(&SessionId::from("mine")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.save(&session_with_turns("gone")).await.unwrap();
        assert!(store.delete(&SessionId::from("gone")).await.unwrap());
        assert!(!store.delete(&SessionId::from("gone")).await.unwrap());
        assert!(!dir.path().join("gone.json").exists());
    }

    #[tokio::test]
    async fn list_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.save(&session_with_turns("b")).await.unwrap();
        store.save(&session_with_turns("a")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec![SessionId::from("a"), SessionId::from("b")]
        );
    }

    #[tokio::test]
    async fn path_traversal_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        let session = Session::new(SessionId::from("../escape"), 5);
        assert!(matches!(store.save(&session).await, Err(StorageError::Io(_))));
    }
}
