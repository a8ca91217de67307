//! # Global Counters
//!
//! Monotonic, lock-free traffic and connection counters (component G).
//! Every writer is a plain `fetch_add`; the stats reporter is the only reader
//! that cares about the relationship between fields, and it tolerates a
//! non-monotonic snapshot across fields as long as no single field ever goes
//! backwards.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, atomically-updated counters. Cheap to clone behind an `Arc`.
#[derive(Debug, Default)]
pub struct Counters {
    pub total_connections: AtomicU64,
    pub fragmented: AtomicU64,
    pub whitelisted: AtomicU64,
    pub failed: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
}

/// Point-in-time copy of `Counters`, used by the stats reporter to difference
/// successive snapshots into a rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub total_connections: u64,
    pub fragmented: u64,
    pub whitelisted: u64,
    pub failed: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl Counters {
    pub fn new() -> Self {
        Counters::default()
    }

    pub fn inc_total_connections(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_fragmented(&self) {
        self.fragmented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_whitelisted(&self) {
        self.whitelisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_in(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_out(&self, n: u64) {
        self.bytes_out.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            fragmented: self.fragmented.load(Ordering::Relaxed),
            whitelisted: self.whitelisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let c = Counters::new();
        let s = c.snapshot();
        assert_eq!(s, CountersSnapshot::default());
    }

    #[test]
    fn increments_are_visible_in_snapshot() {
        let c = Counters::new();
        c.inc_total_connections();
        c.inc_fragmented();
        c.add_bytes_in(100);
        c.add_bytes_out(50);
        let s = c.snapshot();
        assert_eq!(s.total_connections, 1);
        assert_eq!(s.fragmented, 1);
        assert_eq!(s.bytes_in, 100);
        assert_eq!(s.bytes_out, 50);
    }
}
