//! QueueMetrics trait - live queue sizes

use pubsub::Observable;

/// Exposes how many dispatches are waiting per processor
pub trait QueueMetrics: Send + Sync {
    /// Queued minus in-flight for `processor_id`; 0 for unknown processors
    fn pending_count(&self, processor_id: &str) -> Observable<usize>;
}
