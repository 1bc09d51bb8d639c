//! Subscription handles

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Shared flag flipped once a subscriber is torn down
///
/// Callbacks that can outlive their subscriber (e.g. a dispatcher's
/// completion) check this before touching shared state.
#[derive(Debug, Clone, Default)]
pub struct DisposeFlag(Arc<AtomicBool>);

impl DisposeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispose(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle to a spawned observer task
///
/// The task is aborted when the handle is disposed or dropped.
#[derive(Debug)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
    flag: DisposeFlag,
}

impl Subscription {
    /// Spawn `fut` on the current runtime and return its handle
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(fut)),
            flag: DisposeFlag::new(),
        }
    }

    /// A subscription with nothing behind it
    pub fn empty() -> Self {
        Self {
            handle: None,
            flag: DisposeFlag::new(),
        }
    }

    /// Flag shared with callbacks that must be ignored after disposal
    pub fn dispose_flag(&self) -> DisposeFlag {
        self.flag.clone()
    }

    /// Attach an externally created flag, so disposing this handle flips it too
    pub fn with_flag(mut self, flag: DisposeFlag) -> Self {
        self.flag = flag;
        self
    }

    /// Let the task run on its own
    ///
    /// Used for derivation tasks that stop once their output has no receivers.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn dispose(&mut self) {
        self.flag.dispose();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.flag.is_disposed()
    }

    /// Whether the underlying task has run to completion on its own
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A group of subscriptions disposed together
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn dispose(&mut self) {
        for mut subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
    }
}
