//! Append-only, ring-buffered journal
//!
//! Used for the permission audit trail and the effect log. Both are written
//! concurrently by every worker of every agent, so appends must never contend
//! on a shared lock.
//!
//! ```text
//! worker A ──append──┐
//! worker B ──append──┼──► unbounded channel ──(drained on read)──► ring buffer
//! worker C ──append──┘        (lock-free send)                      (capacity N)
//! ```
//!
//! Appends go through an unbounded channel, whose `send` is lock-free for
//! multiple producers. Only readers take the mutex, drain whatever was sent
//! since the last read into the ring, and evict the oldest entries beyond
//! `capacity`. Writers opportunistically drain with `try_lock` every
//! `capacity` appends so an unread journal cannot grow without bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

struct Ring<T> {
    rx: UnboundedReceiver<T>,
    entries: VecDeque<T>,
}

impl<T> Ring<T> {
    fn drain(&mut self, capacity: usize, truncated: &AtomicU64) {
        while let Ok(entry) = self.rx.try_recv() {
            self.entries.push_back(entry);
        }
        while self.entries.len() > capacity {
            self.entries.pop_front();
            truncated.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Bounded append-only log
pub struct Journal<T> {
    tx: UnboundedSender<T>,
    ring: Mutex<Ring<T>>,
    capacity: usize,
    appended: AtomicU64,
    truncated: AtomicU64,
}

impl<T: Clone> Journal<T> {
    /// Create a journal retaining at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = unbounded_channel();
        let capacity = capacity.max(1);
        Self {
            tx,
            ring: Mutex::new(Ring {
                rx,
                entries: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
            appended: AtomicU64::new(0),
            truncated: AtomicU64::new(0),
        }
    }

    /// Append an entry. Never blocks.
    pub fn append(&self, entry: T) {
        // The receiver lives in `self`, so the channel cannot be closed here.
        let _ = self.tx.send(entry);
        let count = self.appended.fetch_add(1, Ordering::Relaxed) + 1;

        if count % self.capacity as u64 == 0 {
            if let Ok(mut ring) = self.ring.try_lock() {
                ring.drain(self.capacity, &self.truncated);
            }
        }
    }

    /// Copy of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.drain(self.capacity, &self.truncated);
        ring.entries.iter().cloned().collect()
    }

    /// Retained entries matching `predicate`
    pub fn filter<F>(&self, predicate: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.drain(self.capacity, &self.truncated);
        ring.entries.iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Total entries ever appended
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Entries dropped from the front of the ring so far
    pub fn truncated(&self) -> u64 {
        // Drain first so the count reflects everything appended so far.
        let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        ring.drain(self.capacity, &self.truncated);
        self.truncated.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_snapshot_preserves_order() {
        let journal = Journal::new(8);
        for i in 0..5 {
            journal.append(i);
        }
        assert_eq!(journal.snapshot(), vec![0, 1, 2, 3, 4]);
        assert_eq!(journal.appended(), 5);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let journal = Journal::new(3);
        for i in 0..10 {
            journal.append(i);
        }
        assert_eq!(journal.snapshot(), vec![7, 8, 9]);
        assert_eq!(journal.truncated(), 7);
        assert_eq!(journal.appended(), 10);
    }

    #[test]
    fn test_concurrent_appends_are_all_recorded() {
        let journal = Arc::new(Journal::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let journal = Arc::clone(&journal);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        journal.append(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(journal.snapshot().len(), 4000);
        assert_eq!(journal.truncated(), 0);
    }

    #[test]
    fn test_filter() {
        let journal = Journal::new(16);
        for i in 0..10 {
            journal.append(i);
        }
        assert_eq!(journal.filter(|v| v % 3 == 0), vec![0, 3, 6, 9]);
    }
}
