//! Time and randomness sources.
//!
//! Token issuance, HMAC timestamps and nonces all read from these traits so
//! that stores and signers can be driven deterministically in tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use rand::RngCore;

/// Source of the current wall-clock time in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Source of random bytes for token material and nonces.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]);

    /// Fresh random value rendered as lowercase hex.
    fn hex(&self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf);
        hex::encode(buf)
    }
}

/// Operating system backed CSPRNG (`rand::rng`, seeded from `getrandom`).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }
}

/// Deterministic source that counts upwards from a seed byte.
///
/// Each call continues where the previous one stopped, so consecutive nonces
/// differ while staying reproducible.
#[derive(Debug)]
pub struct FixedRandom {
    next: Mutex<u8>,
}

impl FixedRandom {
    pub fn new(seed: u8) -> Self {
        Self {
            next: Mutex::new(seed),
        }
    }
}

impl RandomSource for FixedRandom {
    fn fill(&self, buf: &mut [u8]) {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        for byte in buf.iter_mut() {
            *byte = *next;
            *next = next.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(42);
        assert_eq!(clock.now_ms(), 42);
    }

    #[test]
    fn fixed_random_is_reproducible_but_not_repeating() {
        let rng = FixedRandom::new(0xfe);
        assert_eq!(rng.hex(3), "feff00");
        assert_eq!(rng.hex(2), "0102");
    }

    #[test]
    fn os_random_fills_requested_length() {
        assert_eq!(OsRandom.hex(16).len(), 32);
    }
}
