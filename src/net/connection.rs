//! Live-connection accounting for one worker.
//!
//! Every worker shares the public port, so connection ids carry the
//! worker's pool slot (`w3-17`) to keep interleaved log lines apart.
//! In-process servers without a slot use `local-17`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Identifier of one accepted socket: pool slot plus a per-worker sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    slot: Option<usize>,
    seq: u64,
}

impl ConnectionId {
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some(slot) => write!(f, "w{slot}-{}", self.seq),
            None => write!(f, "local-{}", self.seq),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    next_seq: AtomicU64,
    active: AtomicU64,
    accepted: AtomicU64,
}

/// Counts a worker's connections. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    slot: Option<usize>,
    counters: Arc<Counters>,
}

impl ConnectionTracker {
    /// Tracker for a server that is not part of the pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker whose ids are prefixed with the worker's pool slot.
    pub fn for_slot(slot: usize) -> Self {
        Self {
            slot: Some(slot),
            counters: Arc::default(),
        }
    }

    /// Record an accepted socket. The guard releases it on drop, also when
    /// the connection task panics.
    pub fn track(&self) -> ConnectionGuard {
        let seq = self.counters.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            counters: Arc::clone(&self.counters),
            id: ConnectionId {
                slot: self.slot,
                seq,
            },
            opened: Instant::now(),
        }
    }

    /// Sockets accepted and not yet closed.
    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Sockets accepted since this worker's server was created.
    pub fn accepted_count(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }
}

/// One accepted socket, held by its connection task.
#[derive(Debug)]
pub struct ConnectionGuard {
    counters: Arc<Counters>,
    id: ConnectionId,
    opened: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(
            connection_id = %self.id,
            held_ms = self.opened.elapsed().as_millis() as u64,
            "Connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_the_worker_slot() {
        let tracker = ConnectionTracker::for_slot(3);
        let first = tracker.track();
        let second = tracker.track();

        assert_eq!(first.id().to_string(), "w3-1");
        assert_eq!(second.id().to_string(), "w3-2");
        assert_eq!(second.id().slot(), Some(3));
    }

    #[test]
    fn unslotted_ids_are_local() {
        let guard = ConnectionTracker::new().track();
        assert_eq!(guard.id().to_string(), "local-1");
        assert_eq!(guard.id().slot(), None);
    }

    #[test]
    fn clones_share_counts_and_sequence() {
        let tracker = ConnectionTracker::for_slot(0);
        assert_eq!(tracker.active_count(), 0);

        let a = tracker.track();
        let b = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(a.id(), b.id());

        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.accepted_count(), 2);
    }

    #[test]
    fn separate_workers_count_independently() {
        let w0 = ConnectionTracker::for_slot(0);
        let w1 = ConnectionTracker::for_slot(1);
        let _g = w0.track();
        assert_eq!(w0.active_count(), 1);
        assert_eq!(w1.active_count(), 0);
        assert_eq!(w1.track().id().seq(), 1);
    }

    #[test]
    fn panicking_task_still_releases() {
        let tracker = ConnectionTracker::for_slot(2);
        let inner = tracker.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.track();
            panic!("connection task failed");
        });
        assert!(result.is_err());
        assert_eq!(tracker.active_count(), 0);
    }
}
