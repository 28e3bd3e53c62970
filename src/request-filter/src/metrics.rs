//! Gate counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for connections passing through a gate.
#[derive(Debug, Default)]
pub struct GateMetrics {
    /// Connections attempted.
    attempts: AtomicU64,

    /// Connections handed back to the caller.
    admitted: AtomicU64,

    /// Literal targets refused before connecting.
    denied_preflight: AtomicU64,

    /// Resolved addresses refused during connect.
    denied_lookup: AtomicU64,

    /// Denied connections that had a socket to tear down.
    torn_down: AtomicU64,

    /// Transport failures unrelated to policy.
    failed: AtomicU64,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied_preflight(&self) {
        self.denied_preflight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied_lookup(&self) {
        self.denied_lookup.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_torn_down(&self) {
        self.torn_down.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total denials of either kind.
    pub fn denied(&self) -> u64 {
        self.denied_preflight.load(Ordering::Relaxed) + self.denied_lookup.load(Ordering::Relaxed)
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            denied_preflight: self.denied_preflight.load(Ordering::Relaxed),
            denied_lookup: self.denied_lookup.load(Ordering::Relaxed),
            torn_down: self.torn_down.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`GateMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub admitted: u64,
    pub denied_preflight: u64,
    pub denied_lookup: u64,
    pub torn_down: u64,
    pub failed: u64,
}

impl MetricsSnapshot {
    pub fn denied(&self) -> u64 {
        self.denied_preflight + self.denied_lookup
    }
}
