//! Process-wide event counters feeding the load ticker.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Monotonic counters bumped from the hot paths. All relaxed: the
/// ticker reads them for trend lines, not for accounting.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    events_in: AtomicU64,
    events_out: AtomicU64,
    errors: AtomicU64,
    active_users: AtomicUsize,
}

/// A point-in-time read of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub events_in: u64,
    pub events_out: u64,
    pub errors: u64,
    pub active_users: usize,
}

impl MetricsCollector {
    /// Creates a zeroed collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// One inbound event was routed.
    pub fn note_event_in(&self) {
        self.events_in.fetch_add(1, Ordering::Relaxed);
    }

    /// One outbound event was delivered to a connection.
    pub fn note_event_out(&self) {
        self.events_out.fetch_add(1, Ordering::Relaxed);
    }

    /// One validation or authorization failure was answered.
    pub fn note_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// The connection handler updates this on connect/disconnect.
    pub fn set_active_users(&self, count: usize) {
        self.active_users.store(count, Ordering::Relaxed);
    }

    /// Reads all counters at once.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_in: self.events_in.load(Ordering::Relaxed),
            events_out: self.events_out.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_users: self.active_users.load(Ordering::Relaxed),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let c = MetricsCollector::new();
        c.note_event_in();
        c.note_event_in();
        c.note_event_out();
        c.note_error();
        c.set_active_users(3);

        let snap = c.snapshot();
        assert_eq!(snap.events_in, 2);
        assert_eq!(snap.events_out, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.active_users, 3);
    }

    #[test]
    fn test_snapshot_is_stable_between_bumps() {
        let c = MetricsCollector::new();
        c.note_event_in();
        let a = c.snapshot();
        let b = c.snapshot();
        assert_eq!(a, b);
    }
}
