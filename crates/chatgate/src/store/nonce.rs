//! Used-nonce set for the HMAC scheme.

use std::time::Duration;

use dashmap::DashSet;
use tokio::task::JoinHandle;
use tracing::debug;

/// Process-wide set of consumed nonces.
///
/// Entries do not expire individually: the whole set is cleared every
/// eviction interval. A nonce consumed just before a clear can therefore be
/// replayed once afterwards; the HMAC timestamp skew still bounds how old
/// that replay can be.
#[derive(Debug, Default)]
pub struct NonceStore {
    nonces: DashSet<String>,
}

impl NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the nonce has already been consumed.
    pub fn contains(&self, nonce: &str) -> bool {
        self.nonces.contains(nonce)
    }

    /// Record a nonce. Returns `false` if it was already present.
    pub fn insert(&self, nonce: &str) -> bool {
        self.nonces.insert(nonce.to_string())
    }

    /// Forget every nonce.
    pub fn clear(&self) {
        self.nonces.clear();
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    /// Spawn the background task that clears the set every `interval`.
    pub fn start_eviction_task(self: &std::sync::Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut timer = tokio::time::interval_at(start, interval);
            loop {
                timer.tick().await;
                let evicted = store.len();
                store.clear();
                debug!(evicted, "cleared used-nonce set");
            }
        })
    }
}
