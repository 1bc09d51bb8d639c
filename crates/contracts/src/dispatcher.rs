//! Dispatcher trait - pipeline output interface

use std::fmt;
use std::sync::Arc;

use crate::Dispatch;

type CompletionFn = dyn Fn(Vec<Dispatch>) + Send + Sync;

/// Callback a dispatcher invokes with each acknowledged subset
///
/// May be called any number of times, from any thread. Dispatches that are
/// never reported stay queued for a later attempt.
#[derive(Clone)]
pub struct DispatchCompletion(Arc<CompletionFn>);

impl DispatchCompletion {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Dispatch>) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A completion that discards every acknowledgement
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report `dispatches` as delivered; empty batches are ignored
    pub fn complete(&self, dispatches: Vec<Dispatch>) {
        if !dispatches.is_empty() {
            (self.0)(dispatches);
        }
    }
}

impl fmt::Debug for DispatchCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DispatchCompletion")
    }
}

/// Output consumer of dispatches
///
/// `dispatch` must not block; delivery failure is expressed by never
/// completing the affected dispatches.
pub trait Dispatcher: Send + Sync {
    /// Stable id, also used as the queue processor id
    fn id(&self) -> &str;

    /// Maximum dispatches handed over per call
    fn dispatch_limit(&self) -> usize {
        1
    }

    fn dispatch(&self, dispatches: Vec<Dispatch>, completion: DispatchCompletion);
}
