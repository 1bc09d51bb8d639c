//! Per-dispatcher counters

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// In-process counters for one dispatcher
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    /// Pending dispatches as last observed by the loop
    pending: AtomicUsize,
    /// Dispatches handed to the dispatcher
    sent_count: AtomicU64,
    /// Dispatches acknowledged by the dispatcher
    completed_count: AtomicU64,
    /// Dispatches removed without being sent (consent, transform, load rules)
    dropped_count: AtomicU64,
    /// Queue operations that failed inside the loop
    failure_count: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending.store(pending, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    pub fn add_sent(&self, n: usize) {
        self.sent_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    pub fn add_completed(&self, n: usize) {
        self.completed_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn add_dropped(&self, n: usize) {
        self.dropped_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            pending: self.pending(),
            sent_count: self.sent_count(),
            completed_count: self.completed_count(),
            dropped_count: self.dropped_count(),
            failure_count: self.failure_count(),
        }
    }
}

/// Snapshot of dispatcher metrics (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub pending: usize,
    pub sent_count: u64,
    pub completed_count: u64,
    pub dropped_count: u64,
    pub failure_count: u64,
}
