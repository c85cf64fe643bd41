use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use takeoff_core::TakeoffTable;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// The last AI result of one user, plus their edits
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub rules: String,
    pub model: String,
    /// The model's reply exactly as received
    pub raw_reply: String,
    pub table: TakeoffTable,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(rules: String, model: String, raw_reply: String, table: TakeoffTable) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rules,
            model,
            raw_reply,
            table,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Idle sessions older than this are dropped (minutes)
pub const DEFAULT_SESSION_TTL_MINS: u32 = 120;
/// Upper bound on live sessions; the least recently touched one goes first
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// In-memory session tables; nothing outlives the process.
///
/// Expired sessions are swept on every insert, and the store never holds
/// more than `max_sessions`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
    max_age: Duration,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_TTL_MINS, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl_mins: u32, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            max_age: Duration::minutes(i64::from(ttl_mins)),
            max_sessions,
        }
    }

    pub async fn insert(&self, session: Session) -> Uuid {
        let id = session.id;
        let mut sessions = self.inner.write().await;

        let cutoff = Utc::now() - self.max_age;
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        let expired = before - sessions.len();
        if expired > 0 {
            debug!("Dropped {} expired sessions", expired);
        }

        while !sessions.is_empty() && sessions.len() >= self.max_sessions {
            let oldest = sessions
                .values()
                .min_by_key(|s| s.updated_at)
                .map(|s| s.id);
            match oldest {
                Some(oldest) => {
                    sessions.remove(&oldest);
                    debug!("Evicted session {} (store full)", oldest);
                }
                None => break,
            }
        }

        sessions.insert(id, session);
        id
    }

    pub async fn get(&self, id: &Uuid) -> Option<Session> {
        self.inner.read().await.get(id).cloned()
    }

    /// Replace a session's table through `f`, returning the updated session
    pub async fn update_table<F>(&self, id: &Uuid, f: F) -> Option<Session>
    where
        F: FnOnce(&TakeoffTable) -> TakeoffTable,
    {
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(id)?;
        session.table = f(&session.table);
        session.updated_at = Utc::now();
        Some(session.clone())
    }

    pub async fn remove(&self, id: &Uuid) -> Option<Session> {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
