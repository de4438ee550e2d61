//! Process-wide emergency stop
//!
//! ```text
//!   engage() ──► write-lock gate ──► flag = true ──► notify waiters
//!
//!   worker:  read-lock gate ──► flag? ──no──► pending → running
//!                                    └─yes──► park until release()
//! ```
//!
//! The flag is a single `AtomicBool` (SeqCst) read once per decision. The
//! gate is an `RwLock<()>` that is only write-locked by `engage()`: every
//! pending→running transition happens under a read lock, so once `engage()`
//! returns no transition can still be in progress. Readers never contend
//! with each other, so agents are not serialized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tokio::sync::watch;

use crate::metrics;

pub struct Lockdown {
    engaged: AtomicBool,
    gate: RwLock<()>,
    notify: watch::Sender<bool>,
}

impl Lockdown {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            engaged: AtomicBool::new(false),
            gate: RwLock::new(()),
            notify,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Engage the stop. Returns false if it was already engaged.
    pub fn engage(&self) -> bool {
        let _gate = self.gate.write().unwrap_or_else(|e| e.into_inner());
        let was = self.engaged.swap(true, Ordering::SeqCst);
        self.notify.send_replace(true);
        metrics::set_emergency_stop(true);
        !was
    }

    /// Release the stop. Returns false if it was not engaged.
    pub fn release(&self) -> bool {
        let _gate = self.gate.write().unwrap_or_else(|e| e.into_inner());
        let was = self.engaged.swap(false, Ordering::SeqCst);
        self.notify.send_replace(false);
        metrics::set_emergency_stop(false);
        was
    }

    /// Run `admit` unless the stop is engaged.
    ///
    /// `admit` runs under the read side of the gate and must not block.
    pub fn try_admit<R>(&self, admit: impl FnOnce() -> R) -> Option<R> {
        let _gate = self.gate.read().unwrap_or_else(|e| e.into_inner());
        if self.engaged.load(Ordering::SeqCst) {
            None
        } else {
            Some(admit())
        }
    }

    /// Resolve once the stop is released (immediately if it is not engaged)
    pub async fn wait_released(&self) {
        let mut rx = self.notify.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel.
        let _ = rx.wait_for(|engaged| !*engaged).await;
    }
}

impl Default for Lockdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_engage_and_release() {
        let lockdown = Lockdown::new();
        assert!(!lockdown.is_engaged());
        assert!(lockdown.engage());
        assert!(!lockdown.engage());
        assert!(lockdown.is_engaged());
        assert!(lockdown.release());
        assert!(!lockdown.release());
    }

    #[test]
    fn test_try_admit_blocked_while_engaged() {
        let lockdown = Lockdown::new();
        assert_eq!(lockdown.try_admit(|| 7), Some(7));
        lockdown.engage();
        assert_eq!(lockdown.try_admit(|| 7), None);
        lockdown.release();
        assert_eq!(lockdown.try_admit(|| 7), Some(7));
    }

    #[tokio::test]
    async fn test_wait_released_wakes_on_release() {
        let lockdown = Arc::new(Lockdown::new());
        lockdown.engage();

        let waiter = {
            let lockdown = Arc::clone(&lockdown);
            tokio::spawn(async move { lockdown.wait_released().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lockdown.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
