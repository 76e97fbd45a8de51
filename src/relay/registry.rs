//! Live generation sessions, addressable by id so a call can be cancelled
//! from outside its stream.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CancelHandle, GenerationSession, RelayOutcome};
use crate::models::{ChatMessage, SkinContent};

/// Sessions untouched for this long are dropped once idle.
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Read-only view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub busy: bool,
    pub turns: Vec<ChatMessage>,
    pub snapshot: SkinContent,
}

struct Entry {
    session: GenerationSession,
    last_active: Instant,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Entry>>,
    history_limit: usize,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(history_limit: usize, idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history_limit,
            idle_ttl,
        }
    }

    /// Start a model call for `session_id`, superseding any call still in
    /// flight there. Returns the call's cancel handle and the trimmed turns.
    pub async fn begin(
        &self,
        session_id: &str,
        snapshot: SkinContent,
        history: &[ChatMessage],
    ) -> (CancelHandle, Vec<ChatMessage>) {
        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        self.prune(&mut sessions, now);

        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                session: GenerationSession::new(SkinContent::default(), self.history_limit),
                last_active: now,
            });
        entry.last_active = now;
        entry.session.set_snapshot(snapshot);
        entry.session.reset_turns(history);
        let handle = entry.session.begin();
        (handle, entry.session.turns().to_vec())
    }

    /// Record how the call behind `handle` ended.
    pub async fn finish(&self, session_id: &str, handle: &CancelHandle, outcome: &RelayOutcome) {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(session_id) else {
            return;
        };
        if entry.session.finish(handle, outcome) {
            entry.last_active = Instant::now();
        } else {
            debug!("Dropped outcome of superseded call in session {}", session_id);
        }
    }

    /// Cancel the in-flight call of a session. Returns `false` when nothing
    /// was running.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        let cancelled = sessions
            .get(session_id)
            .is_some_and(|entry| entry.session.cancel());
        if cancelled {
            info!("Cancel requested for session {}", session_id);
        }
        cancelled
    }

    pub async fn view(&self, session_id: &str) -> Option<SessionView> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|entry| SessionView {
            session_id: session_id.to_string(),
            busy: entry.session.is_busy(),
            turns: entry.session.turns().to_vec(),
            snapshot: entry.session.snapshot().clone(),
        })
    }

    fn prune(&self, sessions: &mut HashMap<String, Entry>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.session.is_busy() || now.duration_since(entry.last_active) < self.idle_ttl
        });
        let dropped = before - sessions.len();
        if dropped > 0 {
            debug!("Pruned {} idle generation sessions", dropped);
        }
    }
}
