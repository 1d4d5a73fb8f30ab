//! In-memory sessions keyed by source user id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::auth::user::User;
use crate::clock::Clock;

/// An authenticated user bound to a listener for a limited time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    pub fn new(user: User, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            created_at: now,
            expires_at: now + ttl,
            user,
        }
    }

    /// Valid iff `created_at <= now < expires_at`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.created_at <= now && now < self.expires_at
    }
}

/// uid → session map owned by a listener.
pub struct SessionStore {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create (or replace) the session for `uid`.
    pub async fn create(&self, uid: &str, user: User) -> Session {
        let session = Session::new(user, self.clock.now(), self.ttl);
        debug!(uid, user = %session.user.name, expires_at = %session.expires_at, "Session created");
        self.sessions
            .write()
            .await
            .insert(uid.to_string(), session.clone());
        session
    }

    /// Look up a valid session. Expired sessions are evicted.
    pub async fn get(&self, uid: &str) -> Option<Session> {
        let now = self.clock.now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(uid) {
                Some(session) if session.is_valid_at(now) => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // a create may have replaced it since the read
        let mut sessions = self.sessions.write().await;
        let now = self.clock.now();
        match sessions.get(uid).map(|session| session.is_valid_at(now)) {
            Some(true) => sessions.get(uid).cloned(),
            Some(false) => {
                debug!(uid, "Session expired");
                sessions.remove(uid);
                None
            }
            None => None,
        }
    }

    pub async fn remove(&self, uid: &str) -> Option<Session> {
        self.sessions.write().await.remove(uid)
    }

    /// Drop every expired session. Returns the number removed.
    pub async fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.is_valid_at(now));
        before - sessions.len()
    }

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
    use crate::clock::ManualClock;

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SessionStore::new(Duration::minutes(10), clock.clone());
        (store, clock)
    }

    #[test]
    fn validity_window() {
        let now = Utc::now();
        let user = User::new("alice", vec![]).unwrap();
        let session = Session::new(user, now, Duration::minutes(5));
        assert!(session.is_valid_at(now));
        assert!(session.is_valid_at(now + Duration::minutes(4)));
        assert!(!session.is_valid_at(now + Duration::minutes(5)));
        assert!(!session.is_valid_at(now - Duration::seconds(1)));
    }

    #[tokio::test]
    async fn create_and_get() {
        let (store, _clock) = store();
        let user = User::new("alice", vec![]).unwrap();
        store.create("uid-1", user.clone()).await;

        let session = store.get("uid-1").await.unwrap();
        assert_eq!(session.user, user);
        assert!(store.get("uid-2").await.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_evicted() {
        let (store, clock) = store();
        store
            .create("uid-1", User::new("alice", vec![]).unwrap())
            .await;
        clock.advance(Duration::minutes(11));

        assert!(store.get("uid-1").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn expired_lookup_keeps_a_concurrent_replacement() {
        let (store, clock) = store();
        store
            .create("uid-1", User::new("alice", vec![]).unwrap())
            .await;
        clock.advance(Duration::minutes(11));

        let replacement = User::new("alice", vec![]).unwrap();
        let (looked_up, created) =
            tokio::join!(store.get("uid-1"), store.create("uid-1", replacement));

        if let Some(session) = looked_up {
            assert_eq!(session, created);
        }
        assert_eq!(store.get("uid-1").await, Some(created));
    }

    #[tokio::test]
    async fn prune_removes_only_expired() {
        let (store, clock) = store();
        store
            .create("old", User::new("alice", vec![]).unwrap())
            .await;
        clock.advance(Duration::minutes(6));
        store
            .create("new", User::new("bob", vec![]).unwrap())
            .await;
        clock.advance(Duration::minutes(5));

        assert_eq!(store.prune_expired().await, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get("new").await.is_some());
    }
}
