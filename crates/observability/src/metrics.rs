//! Dispatch pipeline metrics
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! every call is a no-op.

use contracts::TrackStatus;
use metrics::{counter, gauge, histogram};

/// Outcome of one `track()` call
pub fn record_track(status: TrackStatus) {
    counter!("dispatch_tracked_total", "result" => status.as_str()).increment(1);
}

/// Failed `track()` call (storage error)
pub fn record_track_failure() {
    counter!("dispatch_tracked_total", "result" => "error").increment(1);
}

/// Dispatches handed to a dispatcher
pub fn record_sent(dispatcher: &str, count: usize) {
    counter!("dispatch_sent_total", "dispatcher" => dispatcher.to_string()).increment(count as u64);
}

/// Dispatches acknowledged by a dispatcher
pub fn record_completed(dispatcher: &str, count: usize) {
    counter!("dispatch_completed_total", "dispatcher" => dispatcher.to_string())
        .increment(count as u64);
}

/// Dispatches removed from a queue without being sent
pub fn record_dropped(dispatcher: &str, reason: DropReason, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "dispatch_dropped_total",
        "dispatcher" => dispatcher.to_string(),
        "reason" => reason.as_str()
    )
    .increment(count as u64);
}

/// Pending (queued, not in-flight) dispatches of one dispatcher
pub fn record_queue_pending(dispatcher: &str, pending: usize) {
    gauge!("dispatch_queue_pending", "dispatcher" => dispatcher.to_string()).set(pending as f64);
}

/// Time from dispatch creation to acknowledgement
pub fn record_delivery_latency_ms(dispatcher: &str, latency_ms: f64) {
    histogram!("dispatch_delivery_latency_ms", "dispatcher" => dispatcher.to_string())
        .record(latency_ms);
}

/// Why a queued dispatch was removed unsent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Consent,
    Transformation,
    LoadRules,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Consent => "consent",
            DropReason::Transformation => "transformation",
            DropReason::LoadRules => "load_rules",
        }
    }
}
