//! In-memory session registry
//!
//! Process-wide cache mapping session identifier to live session state.
//! Each resident session sits behind its own async mutex; holding that
//! handle lock for the duration of a create/turn is what serializes
//! mutating operations per session while leaving different sessions fully
//! independent. The map itself is guarded by one short-lived lock that is
//! never held across I/O.
//!
//! Residency is capped: when the map grows past the configured limit the
//! least-recently-touched entry is dropped. The durable copy in storage
//! remains authoritative, so eviction only costs a reload on next access.

use crate::error::Result;
use crate::storage::SqliteStorage;
use crate::story::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared, individually lockable session entry
pub type SessionHandle = Arc<Mutex<Session>>;

struct ResidentEntry {
    handle: SessionHandle,
    last_touched: u64,
}

struct RegistryInner {
    sessions: HashMap<String, ResidentEntry>,
    // Logical clock for LRU ordering; bumped on every touch.
    clock: u64,
}

/// Process-wide cache of live sessions
pub struct SessionRegistry {
    max_resident: usize,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry with the given residency cap (minimum 1)
    pub fn new(max_resident: usize) -> Self {
        Self {
            max_resident: max_resident.max(1),
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Look up a live session without touching storage
    pub async fn get(&self, session_id: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.lock().await;
        inner.clock += 1;
        let clock = inner.clock;

        inner.sessions.get_mut(session_id).map(|entry| {
            entry.last_touched = clock;
            Arc::clone(&entry.handle)
        })
    }

    /// Resolve a session, reconciling with storage on a registry miss
    ///
    /// A persisted record is materialized into the registry and returned;
    /// a total miss yields `None` and registers nothing.
    pub async fn resolve(
        &self,
        session_id: &str,
        storage: &SqliteStorage,
    ) -> Result<Option<SessionHandle>> {
        if let Some(handle) = self.get(session_id).await {
            return Ok(Some(handle));
        }

        match storage.load_session(session_id)? {
            Some(session) => {
                tracing::debug!(session_id = %session_id, "Rehydrated session from storage");
                Ok(Some(self.insert(session).await))
            }
            None => Ok(None),
        }
    }

    /// Register a session, replacing any existing entry for its id
    ///
    /// Returns the handle now owned by the registry. Inserting past the
    /// residency cap evicts the least-recently-touched other entry.
    pub async fn insert(&self, session: Session) -> SessionHandle {
        let session_id = session.session_id.clone();
        let handle: SessionHandle = Arc::new(Mutex::new(session));

        let mut inner = self.inner.lock().await;
        inner.clock += 1;
        let clock = inner.clock;
        inner.sessions.insert(
            session_id.clone(),
            ResidentEntry {
                handle: Arc::clone(&handle),
                last_touched: clock,
            },
        );

        if inner.sessions.len() > self.max_resident {
            let victim = inner
                .sessions
                .iter()
                .filter(|(id, _)| **id != session_id)
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(id, _)| id.clone());

            if let Some(victim) = victim {
                inner.sessions.remove(&victim);
                tracing::debug!(session_id = %victim, "Evicted least-recently-used session");
            }
        }

        handle
    }

    /// Number of sessions currently resident in memory
    pub async fn resident_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::WorldState;
    use tempfile::tempdir;

    fn test_storage() -> (SqliteStorage, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let storage =
            SqliteStorage::new_with_path(dir.path().join("db.sqlite")).expect("storage");
        (storage, dir)
    }

    #[tokio::test]
    async fn test_get_on_empty_registry_is_none() {
        let registry = SessionRegistry::new(8);
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_insert_then_get_returns_same_session() {
        let registry = SessionRegistry::new(8);
        registry.insert(Session::seed("s1")).await;

        let handle = registry.get("s1").await.expect("resident");
        assert_eq!(handle.lock().await.session_id, "s1");
    }

    #[tokio::test]
    async fn test_resolve_rehydrates_from_storage() {
        let (storage, _dir) = test_storage();
        let registry = SessionRegistry::new(8);

        let session = Session::seed("persisted");
        storage
            .save_session(
                &session.session_id,
                &session.history,
                "",
                &WorldState::default(),
            )
            .expect("save");

        let handle = registry
            .resolve("persisted", &storage)
            .await
            .expect("resolve")
            .expect("found");
        assert_eq!(handle.lock().await.history.len(), 2);

        // Now resident: a second lookup hits the registry directly.
        assert!(registry.get("persisted").await.is_some());
    }

    #[tokio::test]
    async fn test_resolve_total_miss_registers_nothing() {
        let (storage, _dir) = test_storage();
        let registry = SessionRegistry::new(8);

        let resolved = registry.resolve("ghost", &storage).await.expect("resolve");
        assert!(resolved.is_none());
        assert_eq!(registry.resident_count().await, 0);
    }

    #[tokio::test]
    async fn test_insert_replaces_existing_entry() {
        let registry = SessionRegistry::new(8);
        registry.insert(Session::seed("s1")).await;

        let mut replacement = Session::seed("s1");
        replacement.story_text = "replaced".to_string();
        registry.insert(replacement).await;

        let handle = registry.get("s1").await.expect("resident");
        assert_eq!(handle.lock().await.story_text, "replaced");
        assert_eq!(registry.resident_count().await, 1);
    }

    #[tokio::test]
    async fn test_residency_cap_evicts_least_recently_used() {
        let registry = SessionRegistry::new(2);
        registry.insert(Session::seed("a")).await;
        registry.insert(Session::seed("b")).await;

        // Touch "a" so "b" becomes the LRU entry.
        registry.get("a").await.expect("a resident");

        registry.insert(Session::seed("c")).await;

        assert_eq!(registry.resident_count().await, 2);
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_never_removes_the_new_entry() {
        let registry = SessionRegistry::new(1);
        registry.insert(Session::seed("a")).await;
        registry.insert(Session::seed("b")).await;

        assert!(registry.get("b").await.is_some());
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_handles_are_shared() {
        let registry = SessionRegistry::new(8);
        registry.insert(Session::seed("s1")).await;

        let h1 = registry.get("s1").await.expect("h1");
        let h2 = registry.get("s1").await.expect("h2");

        h1.lock().await.story_text = "written via h1".to_string();
        assert_eq!(h2.lock().await.story_text, "written via h1");
    }
}
