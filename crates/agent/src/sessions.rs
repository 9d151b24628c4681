use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use askerp_core::domain::conversation::{ConversationHistory, ConversationTurn};

pub const DEFAULT_MAX_SESSIONS: usize = 1_000;

struct SessionSlot {
    history: Arc<Mutex<ConversationHistory>>,
    last_active: u64,
}

#[derive(Default)]
struct Sessions {
    slots: HashMap<String, SessionSlot>,
    tick: u64,
}

/// Isolated history buffers keyed by session id. Each buffer sits behind its
/// own mutex, which serialises turns within a session while other sessions
/// proceed independently.
///
/// At most `max_sessions` buffers are kept. Admitting a new session past the
/// cap evicts the least recently active one.
pub struct SessionStore {
    sessions: RwLock<Sessions>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self { sessions: RwLock::new(Sessions::default()), max_sessions: max_sessions.max(1) }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Existing session buffer, or a new empty one. Either way the session
    /// becomes the most recently active.
    pub async fn session(&self, session_id: &str) -> Arc<Mutex<ConversationHistory>> {
        let mut sessions = self.sessions.write().await;
        sessions.tick += 1;
        let tick = sessions.tick;

        if let Some(slot) = sessions.slots.get_mut(session_id) {
            slot.last_active = tick;
            return Arc::clone(&slot.history);
        }

        if sessions.slots.len() >= self.max_sessions {
            let idle = sessions
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_active)
                .map(|(id, _)| id.clone());
            if let Some(idle) = idle {
                sessions.slots.remove(&idle);
                info!(
                    event_name = "session.evicted",
                    session_id = %idle,
                    max_sessions = self.max_sessions,
                    "evicted least recently active session"
                );
            }
        }

        let history = Arc::new(Mutex::new(ConversationHistory::default()));
        let slot = SessionSlot { history: Arc::clone(&history), last_active: tick };
        sessions.slots.insert(session_id.to_string(), slot);
        history
    }

    pub async fn transcript(&self, session_id: &str) -> Option<Vec<ConversationTurn>> {
        let session =
            self.sessions.read().await.slots.get(session_id).map(|slot| Arc::clone(&slot.history))?;
        let history = session.lock().await;
        Some(history.turns().to_vec())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.slots.is_empty()
    }
}
