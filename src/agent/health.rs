//! Per-agent health and performance counters
//!
//! Every worker of an agent records into the same tracker concurrently.
//! Counters are plain atomic increments; only `last_error` sits behind a
//! mutex, and that mutex is private to one agent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::kind::AgentKind;

/// Read-only snapshot for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub agent_name: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Mean execution time over completed and failed tasks
    pub mean_latency_ms: f64,
    pub last_error: Option<String>,
    pub consecutive_failures: u64,
    /// Backend consultations that produced an action
    pub inference_calls: u64,
    /// Tasks whose action came from the rule table
    pub fallback_uses: u64,
}

pub struct HealthTracker {
    agent: AgentKind,
    completed: AtomicU64,
    failed: AtomicU64,
    latency_total_us: AtomicU64,
    consecutive_failures: AtomicU64,
    inference_calls: AtomicU64,
    fallback_uses: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl HealthTracker {
    pub fn new(agent: AgentKind) -> Self {
        Self {
            agent,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latency_total_us: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            inference_calls: AtomicU64::new(0),
            fallback_uses: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.add_latency(elapsed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self, elapsed: Duration, error: impl Into<String>) {
        self.add_latency(elapsed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        let error = error.into();
        match self.last_error.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }

    pub fn record_inference(&self) {
        self.inference_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_uses.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AgentHealth {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let mean_latency_ms = if finished == 0 {
            0.0
        } else {
            self.latency_total_us.load(Ordering::Relaxed) as f64 / finished as f64 / 1000.0
        };

        let last_error = match self.last_error.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        AgentHealth {
            agent_name: self.agent.as_str().to_string(),
            tasks_completed: completed,
            tasks_failed: failed,
            mean_latency_ms,
            last_error,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            inference_calls: self.inference_calls.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
        }
    }
}
