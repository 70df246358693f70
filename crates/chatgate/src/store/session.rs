//! In-memory session store backing the CSRF scheme.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use chatgate_protocol::{Clock, RandomSource};

/// Bytes of randomness in a session id.
const SESSION_ID_BYTES: usize = 24;

/// Snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Active CSRF token, if one has been issued.
    pub csrf_token: Option<String>,
    pub expires_at_ms: i64,
}

#[derive(Debug)]
struct SessionRecord {
    csrf_token: Option<String>,
    expires_at_ms: i64,
}

/// Session store with rolling idle expiry.
pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
    idle_ttl: Duration,
    save_uninitialized: bool,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
}

impl SessionStore {
    pub fn new(
        idle_ttl: Duration,
        save_uninitialized: bool,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_ttl,
            save_uninitialized,
            clock,
            rng,
        }
    }

    /// Whether empty sessions are persisted eagerly.
    pub fn save_uninitialized(&self) -> bool {
        self.save_uninitialized
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    fn next_expiry(&self) -> i64 {
        self.clock.now_ms() + self.idle_ttl.as_millis() as i64
    }

    /// Create an empty session and return its id.
    pub fn create(&self) -> String {
        let id = self.rng.hex(SESSION_ID_BYTES);
        self.sessions.insert(
            id.clone(),
            SessionRecord {
                csrf_token: None,
                expires_at_ms: self.next_expiry(),
            },
        );
        debug!(session = %short_id(&id), "created session");
        id
    }

    /// Look up a session and extend its expiry.
    ///
    /// Returns `None` for unknown ids; expired sessions are dropped.
    pub fn touch(&self, id: &str) -> Option<Session> {
        let now = self.clock.now_ms();
        if self
            .sessions
            .remove_if(id, |_, record| record.expires_at_ms <= now)
            .is_some()
        {
            debug!(session = %short_id(id), "session expired");
            return None;
        }

        let mut record = self.sessions.get_mut(id)?;
        record.expires_at_ms = self.next_expiry();
        Some(Session {
            id: id.to_string(),
            csrf_token: record.csrf_token.clone(),
            expires_at_ms: record.expires_at_ms,
        })
    }

    /// Token stored on a live session.
    pub fn csrf_token(&self, id: &str) -> Option<String> {
        let now = self.clock.now_ms();
        self.sessions
            .get(id)
            .filter(|record| record.expires_at_ms > now)
            .and_then(|record| record.csrf_token.clone())
    }

    /// Store a token on a session, replacing any previous one.
    ///
    /// Returns `false` if the session does not exist.
    pub fn set_csrf_token(&self, id: &str, token: String) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut record) => {
                record.csrf_token = Some(token);
                record.expires_at_ms = self.next_expiry();
                true
            }
            None => false,
        }
    }

    /// Destroy a session. Returns whether it existed.
    pub fn destroy(&self, id: &str) -> bool {
        let existed = self.sessions.remove(id).is_some();
        if existed {
            debug!(session = %short_id(id), "destroyed session");
        }
        existed
    }

    /// Drop every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at_ms > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawn the background task purging expired sessions.
    pub fn start_sweep_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            loop {
                timer.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "purged expired sessions");
                }
            }
        })
    }
}

/// Session id prefix safe to log.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
