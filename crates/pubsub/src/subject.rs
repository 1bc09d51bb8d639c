//! StateSubject - replay-latest publisher

use std::fmt;

use tokio::sync::watch;

use crate::Observable;

/// Holds the latest value and pushes every change to its subscribers
pub struct StateSubject<T> {
    tx: watch::Sender<T>,
}

impl<T> StateSubject<T> {
    /// Create a subject seeded with `initial`
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Subscribe to the current value and all future changes
    pub fn subscribe(&self) -> Observable<T> {
        self.tx.subscribe()
    }

    /// Replace the value, notifying subscribers even if unchanged
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Mutate in place; subscribers are notified only when `f` returns true
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        self.tx.send_if_modified(f)
    }

    /// Run `f` against the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> StateSubject<T> {
    /// Snapshot of the current value
    pub fn value(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T: PartialEq> StateSubject<T> {
    /// Replace the value only if it differs from the current one
    ///
    /// Returns true if subscribers were notified.
    pub fn publish_distinct(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        })
    }
}

impl<T: Default> Default for StateSubject<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for StateSubject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSubject")
            .field("value", &*self.tx.borrow())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_sees_latest() {
        let subject = StateSubject::new(1);
        subject.publish(2);

        let rx = subject.subscribe();
        assert_eq!(*rx.borrow(), 2);
    }

    #[tokio::test]
    async fn test_publish_distinct_skips_equal_values() {
        let subject = StateSubject::new("open");
        let mut rx = subject.subscribe();
        rx.borrow_and_update();

        assert!(!subject.publish_distinct("open"));
        assert!(!rx.has_changed().unwrap());

        assert!(subject.publish_distinct("closed"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "closed");
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let subject = StateSubject::new(vec![1, 2]);
        let notified = subject.update(|v| {
            v.push(3);
            true
        });

        assert!(notified);
        assert_eq!(subject.value(), vec![1, 2, 3]);
    }
}
