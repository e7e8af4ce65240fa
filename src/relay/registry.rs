use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Relay-side lifecycle of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

/// Per-session message counters
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Client input frames forwarded upstream
    pub frames_forwarded: AtomicU64,
    /// Client input frames dropped before the session opened
    pub frames_dropped: AtomicU64,
    /// Upstream messages forwarded to the client
    pub messages_forwarded: AtomicU64,
    /// Client messages that failed to decode
    pub malformed: AtomicU64,
}

struct SessionEntry {
    state: SessionState,
    opened_at: DateTime<Utc>,
    counters: Arc<SessionCounters>,
}

/// Snapshot of one live session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub state: SessionState,
    pub opened_at: DateTime<Utc>,
    pub frames_forwarded: u64,
    pub messages_forwarded: u64,
    pub malformed_messages: u64,
}

/// Active relay sessions (session_id → entry)
///
/// Entries are only reachable through a [`SessionGuard`]; dropping the guard
/// removes the entry, so every exit path of a session task cleans up.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new `Connecting` session
    pub fn register(&self) -> SessionGuard {
        let id = Uuid::new_v4();
        let counters = Arc::new(SessionCounters::default());

        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                id,
                SessionEntry {
                    state: SessionState::Connecting,
                    opened_at: Utc::now(),
                    counters: Arc::clone(&counters),
                },
            );

        SessionGuard {
            id,
            counters,
            registry: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state_of(&self, id: &Uuid) -> Option<SessionState> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .map(|entry| entry.state)
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let sessions = self.inner.read().unwrap_or_else(|p| p.into_inner());
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, entry)| SessionSummary {
                session_id: *id,
                state: entry.state,
                opened_at: entry.opened_at,
                frames_forwarded: entry.counters.frames_forwarded.load(Ordering::Relaxed),
                messages_forwarded: entry.counters.messages_forwarded.load(Ordering::Relaxed),
                malformed_messages: entry.counters.malformed.load(Ordering::Relaxed),
            })
            .collect();
        summaries.sort_by_key(|s| s.opened_at);
        summaries
    }

    fn set_state(&self, id: &Uuid, state: SessionState) {
        if let Some(entry) = self
            .inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(id)
        {
            entry.state = state;
        }
    }

    fn remove(&self, id: &Uuid) {
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
    }
}

/// Scoped registration of one session
pub struct SessionGuard {
    id: Uuid,
    counters: Arc<SessionCounters>,
    registry: SessionRegistry,
}

impl SessionGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }

    pub fn set_state(&self, state: SessionState) {
        self.registry.set_state(&self.id, state);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
