//! Token-bucket throttle for inference backend calls
//!
//! Each agent owns one bucket. A burst of requests can all consult the
//! backend up to `capacity`; after that calls are admitted at `refill_rate`
//! per second. An empty bucket never blocks or fails a task: the agent
//! records `BackendError::RateLimited` and goes straight to its rule table.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  capacity=50, rate=10/sec                                    │
//! │                                                              │
//! │  ┌─────────────┐                                             │
//! │  │  ● ● ● ● ●  │ ← refilled at rate R per second             │
//! │  └─────────────┘                                             │
//! │        │                                                     │
//! │        ▼                                                     │
//! │  backend call:                                               │
//! │    - token available → consume 1, call the backend           │
//! │    - bucket empty    → skip backend, use rule fallback       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::InferenceConfig;

// Tokens are stored multiplied by SCALE so fractional refills accumulate
const SCALE: u64 = 1000;

// ═══════════════════════════════════════════════════════════════════════════
// RateLimiter
// ═══════════════════════════════════════════════════════════════════════════
// Token count is an AtomicU64 updated with compare_exchange; only the refill
// timestamp sits behind a Mutex because Instant has no atomic form. The lock
// is held for a handful of arithmetic operations and never across an await.
// ═══════════════════════════════════════════════════════════════════════════
pub struct RateLimiter {
    capacity: u64,
    refill_rate: f64,
    tokens_scaled: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            tokens_scaled: AtomicU64::new(capacity.saturating_mul(SCALE)),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Bucket sized from the `[inference]` section
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.rate_capacity, config.rate_per_sec)
    }

    /// Consume one token. False means the caller is throttled.
    pub fn try_acquire(&self) -> bool {
        self.refill();

        let mut current = self.tokens_scaled.load(Ordering::Relaxed);
        loop {
            if current < SCALE {
                return false;
            }
            match self.tokens_scaled.compare_exchange_weak(
                current,
                current - SCALE,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn refill(&self) {
        let now = Instant::now();
        let mut last = self.last_refill.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.duration_since(*last);

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate * SCALE as f64) as u64;
        if tokens_to_add == 0 {
            return;
        }
        *last = now;

        let max_scaled = self.capacity.saturating_mul(SCALE);
        let _ = self
            .tokens_scaled
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |current| {
                Some(current.saturating_add(tokens_to_add).min(max_scaled))
            });
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens_scaled.load(Ordering::Relaxed) / SCALE
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_then_throttled() {
        let limiter = RateLimiter::new(3, 1.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(2, 100.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_zero_capacity_always_throttled() {
        let limiter = RateLimiter::new(0, 0.0);
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_tokens(), 0);
    }

    #[test]
    fn test_from_config_defaults() {
        let limiter = RateLimiter::from_config(&InferenceConfig::default());
        assert_eq!(limiter.capacity(), 50);
        assert!((limiter.refill_rate() - 10.0).abs() < 0.01);
        assert_eq!(limiter.available_tokens(), 50);
    }
}
