//! Session store with durable snapshots.
//!
//! A mutex-guarded map from session key to record, owned by the app state and
//! passed by handle. Every create/remove writes the snapshot before the lock
//! is released, so the periodic timer and shutdown flush cannot race an
//! in-flight mutation. A snapshot write failure is logged; the in-memory
//! state stays authoritative until the next successful write.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{info, warn};

use pgw_core::{generate_session_key, SessionRecord, SessionSummary};

/// Process-wide session store.
pub struct SessionStore {
    path: PathBuf,
    inner: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionStore {
    /// Load the store from its snapshot file.
    ///
    /// A missing file starts empty; an unreadable or malformed file is
    /// logged and starts empty. Startup never fails on snapshot problems.
    pub fn load(path: PathBuf) -> Self {
        let sessions = match std::fs::read_to_string(&path) {
            Ok(content) => {
                match serde_json::from_str::<Vec<(String, SessionRecord)>>(&content) {
                    Ok(pairs) => {
                        info!(count = pairs.len(), path = %path.display(), "loaded sessions from disk");
                        pairs.into_iter().collect()
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "malformed session snapshot, starting empty");
                        HashMap::new()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read session snapshot, starting empty");
                HashMap::new()
            }
        };

        Self {
            path,
            inner: RwLock::new(sessions),
        }
    }

    /// Insert a new record under a freshly generated key, snapshot, and
    /// return the key.
    pub async fn create(&self, record: SessionRecord) -> String {
        let mut sessions = self.inner.write().await;
        let mut key = generate_session_key();
        // A collision is not a practical concern at 128 bits, but never
        // overwrite an existing record.
        while sessions.contains_key(&key) {
            key = generate_session_key();
        }
        sessions.insert(key.clone(), record);
        self.write_snapshot(&sessions);
        key
    }

    /// Fetch a record by key. Absent and expired are indistinguishable.
    pub async fn get(&self, key: &str) -> Option<SessionRecord> {
        self.inner.read().await.get(key).cloned()
    }

    /// Remove a record by key, snapshotting when something changed.
    /// Returns whether the key was present.
    pub async fn remove(&self, key: &str) -> bool {
        let mut sessions = self.inner.write().await;
        if sessions.remove(key).is_some() {
            self.write_snapshot(&sessions);
            true
        } else {
            false
        }
    }

    /// All sessions, tokens redacted.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.inner.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(key, record)| SessionSummary::from_record(key, record))
            .collect();
        summaries.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        summaries
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Write a snapshot of the current state (periodic timer and shutdown).
    /// Takes the write lock so two saves can never interleave their file
    /// writes.
    pub async fn save(&self) {
        let sessions = self.inner.write().await;
        self.write_snapshot(&sessions);
    }

    /// Serialize the map as an ordered `[key, record]` pair list. Called with
    /// the lock held so snapshots serialize with mutations.
    fn write_snapshot(&self, sessions: &HashMap<String, SessionRecord>) {
        let mut pairs: Vec<(&String, &SessionRecord)> = sessions.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        let json = match serde_json::to_string_pretty(&pairs) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize session snapshot");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "cannot create snapshot directory");
                    return;
                }
            }
        }

        match std::fs::write(&self.path, json) {
            Ok(()) => info!(count = sessions.len(), path = %self.path.display(), "saved sessions to disk"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to write session snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(host: &str, user: &str, token: &str) -> SessionRecord {
        SessionRecord::new(host.into(), user.into(), token.into())
    }

    #[tokio::test]
    async fn create_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(dir.path().join("sessions.json"));

        let key = store.create(record("portal.example.com", "admin", "T1")).await;
        let fetched = store.get(&key).await.unwrap();
        assert_eq!(fetched.host, "portal.example.com");
        assert_eq!(fetched.jsessionid, "T1");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn persist_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(path.clone());
        let k1 = store.create(record("a.example.com", "alice", "TA")).await;
        let k2 = store.create(record("b.example.com", "bob", "TB")).await;

        let restored = SessionStore::load(path);
        assert_eq!(restored.count().await, 2);
        let r1 = restored.get(&k1).await.unwrap();
        let r2 = restored.get(&k2).await.unwrap();
        assert_eq!(r1, store.get(&k1).await.unwrap());
        assert_eq!(r2, store.get(&k2).await.unwrap());
    }

    #[tokio::test]
    async fn remove_persists_and_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::load(path.clone());
        let key = store.create(record("a.example.com", "alice", "TA")).await;

        assert!(store.remove(&key).await);
        assert!(!store.remove(&key).await);
        assert!(store.get(&key).await.is_none());

        let restored = SessionStore::load(path);
        assert_eq!(restored.count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_saves_and_mutations_leave_whole_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let store = std::sync::Arc::new(SessionStore::load(path.clone()));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .create(record(&format!("h{i}.example.com"), "u", "T"))
                    .await;
                store.save().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every write ran under the lock, so the file on disk is a complete
        // snapshot, not an interleaving of two writers.
        let restored = SessionStore::load(path);
        assert_eq!(restored.count().await, 8);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(dir.path().join("nope.json"));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{ this is not json ]").unwrap();

        let store = SessionStore::load(path);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn list_redacts_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::load(dir.path().join("sessions.json"));
        let key = store.create(record("a.example.com", "alice", "SECRET")).await;

        let listed = store.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_key, key);
        assert_eq!(listed[0].username, "alice");
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("SECRET"));
    }
}
