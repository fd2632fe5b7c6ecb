//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    cleanup_failures: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub cleanup_failures: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_runs_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_started", "counter incremented");
    }

    pub fn inc_runs_succeeded(&self) {
        self.runs_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_succeeded", "counter incremented");
    }

    pub fn inc_runs_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_failed", "counter incremented");
    }

    pub fn inc_cleanup_failures(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cleanup_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run) rather than on every
    /// increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            runs_started = s.runs_started,
            runs_succeeded = s.runs_succeeded,
            runs_failed = s.runs_failed,
            cleanup_failures = s.cleanup_failures,
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_started.store(0, Ordering::Relaxed);
        self.runs_succeeded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.cleanup_failures.store(0, Ordering::Relaxed);
    }
}
