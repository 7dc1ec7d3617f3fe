//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections so the drain can report what it waits on

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Relaxed ordering is enough: IDs only need to be unique.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    active: AtomicU64,
    accepted: AtomicU64,
}

/// Live and total connection counts of one listener.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new connection. The returned guard releases it on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.counts.active.fetch_add(1, Ordering::SeqCst);
        self.counts.accepted.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            id: ConnectionId::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.active.load(Ordering::SeqCst)
    }

    pub fn accepted_count(&self) -> u64 {
        self.counts.accepted.load(Ordering::Relaxed)
    }
}

/// One live connection. Dropping it (normally or when the connection task is
/// aborted) releases the slot.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counts.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        assert_ne!(ConnectionId::next(), ConnectionId::next());
    }

    #[test]
    fn tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let first = tracker.track();
        let second = tracker.clone().track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(first.id(), second.id());

        drop(first);
        assert_eq!(tracker.active_count(), 1);
        drop(second);
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.accepted_count(), 2);
    }
}
