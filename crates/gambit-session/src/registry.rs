//! The session registry: session id → shared session state.
//!
//! The map sits behind an async `RwLock` so lookups from many connection
//! handlers run concurrently; only insert and remove take the write lock.
//! Each session has its own `Mutex`, so work on one session never waits
//! for another.

use std::collections::HashMap;
use std::sync::Arc;

use gambit_protocol::SessionId;
use tokio::sync::{Mutex, RwLock};

use crate::session::Session;

pub(crate) type SharedSession = Arc<Mutex<Session>>;

/// Maps session ids to their state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `session` unless the id is taken. Returns `false` on a
    /// collision and leaves the existing entry alone.
    pub(crate) async fn insert(&self, id: SessionId, session: Session) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return false;
        }
        sessions.insert(id, Arc::new(Mutex::new(session)));
        true
    }

    pub(crate) async fn get(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    pub(crate) async fn remove(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.write().await.remove(id)
    }

    /// Ids of every registered session, in no particular order.
    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Returns `true` if a session with this id is registered.
    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gambit_protocol::{ParticipantId, Side};

    fn session(id: &str) -> Session {
        Session::new(SessionId::from(id), ParticipantId::from("alice"), Side::White)
    }

    #[tokio::test]
    async fn test_insert_new_id_succeeds() {
        let registry = SessionRegistry::new();
        assert!(registry.insert(SessionId::from("S1"), session("S1")).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(&SessionId::from("S1")).await);
    }

    #[tokio::test]
    async fn test_insert_taken_id_keeps_existing_entry() {
        let registry = SessionRegistry::new();
        registry.insert(SessionId::from("S1"), session("S1")).await;
        let original = registry.get(&SessionId::from("S1")).await.unwrap();

        assert!(!registry.insert(SessionId::from("S1"), session("S1")).await);
        let current = registry.get(&SessionId::from("S1")).await.unwrap();
        assert!(Arc::ptr_eq(&original, &current));
    }

    #[tokio::test]
    async fn test_remove_unknown_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.remove(&SessionId::from("nope")).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_ids_lists_every_session() {
        let registry = SessionRegistry::new();
        registry.insert(SessionId::from("S1"), session("S1")).await;
        registry.insert(SessionId::from("S2"), session("S2")).await;

        let mut ids = registry.ids().await;
        ids.sort();
        assert_eq!(ids, vec![SessionId::from("S1"), SessionId::from("S2")]);
    }
}
