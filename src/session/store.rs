//! Session table
//!
//! Process-wide mapping from session id to [`SessionKey`]. The trait keeps
//! call sites independent of where sessions live; the in-memory table is
//! the only backend today.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::key::SessionKey;

/// Storage for active sessions
pub trait SessionStore: Send + Sync {
    /// Insert a session, returning the shared handle
    fn insert(&self, session: SessionKey) -> Arc<SessionKey>;

    /// Look up a session by id
    fn get(&self, session_id: &str) -> Option<Arc<SessionKey>>;

    /// Counts of live and expired sessions at `now`
    fn stats_at(&self, now: DateTime<Utc>) -> SessionStoreStats;
}

/// Session store statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStoreStats {
    pub total_sessions: usize,
    pub expired_sessions: usize,
    pub active_sessions: usize,
}

/// In-memory session store
///
/// Reads and inserts are sharded by DashMap, so concurrent request
/// handlers never contend on a global lock.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, Arc<SessionKey>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: SessionKey) -> Arc<SessionKey> {
        let session = Arc::new(session);
        self.sessions
            .insert(session.session_id.clone(), Arc::clone(&session));
        session
    }

    fn get(&self, session_id: &str) -> Option<Arc<SessionKey>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    fn stats_at(&self, now: DateTime<Utc>) -> SessionStoreStats {
        let total = self.sessions.len();
        let expired = self
            .sessions
            .iter()
            .filter(|s| s.is_expired_at(now))
            .count();

        SessionStoreStats {
            total_sessions: total,
            expired_sessions: expired,
            active_sessions: total - expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expiry: DateTime<Utc>) -> SessionKey {
        SessionKey::generate("user_1", "0x1", expiry, vec!["game_action".into()], "0.001")
    }

    #[test]
    fn test_insert_get() {
        let store = MemorySessionStore::new();
        let stored = store.insert(session(Utc::now() + Duration::hours(1)));

        let fetched = store.get(&stored.session_id).unwrap();
        assert_eq!(fetched.user_id, "user_1");

        assert!(store.get("unknown").is_none());
    }

    #[test]
    fn test_stats_split_expired() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.insert(session(now + Duration::hours(1)));
        store.insert(session(now - Duration::seconds(1)));

        let stats = store.stats_at(now);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.expired_sessions, 1);
        assert_eq!(stats.active_sessions, 1);
    }

    #[test]
    fn test_concurrent_inserts() {
        let store = Arc::new(MemorySessionStore::new());
        let expiry = Utc::now() + Duration::hours(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let stored = store.insert(session(expiry));
                        assert!(store.get(&stored.session_id).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.stats_at(Utc::now()).total_sessions, 200);
    }
}
