//! Registry of active per-call sessions. Owned by the bridge server; a
//! session never holds a reference back into it.

use crate::session::Session;
use dashmap::DashMap;
use uuid::Uuid;

pub struct SessionRegistry {
    sessions: DashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.call_id(), session);
    }

    pub fn get(&self, call_id: Uuid) -> Option<Session> {
        self.sessions.get(&call_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, call_id: Uuid) {
        self.sessions.remove(&call_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use tokio::sync::mpsc;

    fn test_pool() -> crate::db::DbPool {
        sqlx::Pool::connect_lazy("postgres://localhost/nonexistent").unwrap()
    }

    #[test]
    fn insert_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let call_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel::<SessionEvent>();
        let session = Session::new(call_id, test_pool(), tx);

        registry.insert(session);
        assert!(registry.get(call_id).is_some());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn remove_drops_session() {
        let registry = SessionRegistry::new();
        let call_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel::<SessionEvent>();
        registry.insert(Session::new(call_id, test_pool(), tx));

        registry.remove(call_id);
        assert!(registry.get(call_id).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn get_missing_call_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get(Uuid::new_v4()).is_none());
    }
}
