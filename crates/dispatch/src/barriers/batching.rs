//! BatchingBarrier - holds dispatches back until a full batch is queued

use std::sync::Arc;

use contracts::{Barrier, BarrierState, DataObject, Dispatcher, QueueMetrics};
use pubsub::{changed_any, Observable, StateSubject, Subscription};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

const KEY_BATCH_SIZE: &str = "batch_size";
const DEFAULT_BATCH_SIZE: usize = 1;

/// Open for a dispatcher once its pending count reaches its batch size
///
/// The batch size is the configured `batch_size` clamped to the dispatcher's
/// `dispatch_limit`, or the limit itself when nothing is configured.
pub struct BatchingBarrier {
    dispatchers: Observable<Vec<Arc<dyn Dispatcher>>>,
    queue_metrics: Arc<dyn QueueMetrics>,
    batch_size: StateSubject<Option<usize>>,
}

impl BatchingBarrier {
    pub const ID: &'static str = "BatchingBarrier";

    pub fn new(
        dispatchers: Observable<Vec<Arc<dyn Dispatcher>>>,
        queue_metrics: Arc<dyn QueueMetrics>,
    ) -> Self {
        Self {
            dispatchers,
            queue_metrics,
            batch_size: StateSubject::new(None),
        }
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.batch_size.value()
    }
}

fn read_batch_size(configuration: &DataObject) -> Option<usize> {
    let size = match configuration.get(KEY_BATCH_SIZE)? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(size.max(1) as usize)
}

fn effective_batch_size(
    configured: Option<usize>,
    dispatchers: &[Arc<dyn Dispatcher>],
    dispatcher_id: &str,
) -> usize {
    let Some(limit) = dispatchers
        .iter()
        .find(|d| d.id() == dispatcher_id)
        .map(|d| d.dispatch_limit().max(1))
    else {
        return DEFAULT_BATCH_SIZE;
    };
    configured.map_or(limit, |size| size.clamp(1, limit))
}

fn current_state(
    dispatchers: &mut Observable<Vec<Arc<dyn Dispatcher>>>,
    batch_size: &mut Observable<Option<usize>>,
    pending: &mut Observable<usize>,
    dispatcher_id: &str,
) -> BarrierState {
    let size = effective_batch_size(
        *batch_size.borrow_and_update(),
        &dispatchers.borrow_and_update(),
        dispatcher_id,
    );
    BarrierState::from_open(*pending.borrow_and_update() >= size)
}

impl Barrier for BatchingBarrier {
    fn id(&self) -> &str {
        Self::ID
    }

    fn on_state(&self, dispatcher_id: &str) -> Observable<BarrierState> {
        let dispatcher_id = dispatcher_id.to_string();
        let mut dispatchers = self.dispatchers.clone();
        let mut batch_size = self.batch_size.subscribe();
        let mut pending = self.queue_metrics.pending_count(&dispatcher_id);

        let initial = current_state(&mut dispatchers, &mut batch_size, &mut pending, &dispatcher_id);
        let (tx, rx) = watch::channel(initial);

        Subscription::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = changed_any(std::slice::from_mut(&mut dispatchers)) => {}
                    _ = changed_any(std::slice::from_mut(&mut batch_size)) => {}
                    _ = changed_any(std::slice::from_mut(&mut pending)) => {}
                }
                let next = current_state(&mut dispatchers, &mut batch_size, &mut pending, &dispatcher_id);
                tx.send_if_modified(|current| {
                    if *current != next {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });
            }
        })
        .detach();
        rx
    }

    fn update_configuration(&self, configuration: &DataObject) {
        let size = read_batch_size(configuration);
        debug!(batch_size = ?size, "Batch size updated");
        self.batch_size.publish_distinct(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Dispatch, DispatchCompletion};
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    struct LimitedDispatcher {
        id: &'static str,
        limit: usize,
    }

    impl Dispatcher for LimitedDispatcher {
        fn id(&self) -> &str {
            self.id
        }

        fn dispatch_limit(&self) -> usize {
            self.limit
        }

        fn dispatch(&self, _dispatches: Vec<Dispatch>, _completion: DispatchCompletion) {}
    }

    struct FakeQueue {
        pending: StateSubject<usize>,
    }

    impl QueueMetrics for FakeQueue {
        fn pending_count(&self, _processor_id: &str) -> Observable<usize> {
            self.pending.subscribe()
        }
    }

    fn setup(limit: usize, pending: usize) -> (BatchingBarrier, Arc<FakeQueue>) {
        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![Arc::new(LimitedDispatcher { id: "http", limit })];
        let (_, rx) = watch::channel(dispatchers);
        let queue = Arc::new(FakeQueue {
            pending: StateSubject::new(pending),
        });
        (BatchingBarrier::new(rx, queue.clone()), queue)
    }

    fn config(value: serde_json::Value) -> DataObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_read_batch_size() {
        assert_eq!(read_batch_size(&config(json!({"batch_size": 5}))), Some(5));
        assert_eq!(read_batch_size(&config(json!({"batch_size": "7"}))), Some(7));
        assert_eq!(read_batch_size(&config(json!({"batch_size": 0}))), Some(1));
        assert_eq!(read_batch_size(&config(json!({"batch_size": true}))), None);
        assert_eq!(read_batch_size(&config(json!({}))), None);
    }

    #[test]
    fn test_effective_batch_size() {
        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![Arc::new(LimitedDispatcher { id: "http", limit: 10 })];
        assert_eq!(effective_batch_size(None, &dispatchers, "http"), 10);
        assert_eq!(effective_batch_size(Some(4), &dispatchers, "http"), 4);
        assert_eq!(effective_batch_size(Some(50), &dispatchers, "http"), 10);
        assert_eq!(effective_batch_size(Some(4), &dispatchers, "missing"), 1);
    }

    #[tokio::test]
    async fn test_opens_when_batch_is_full() {
        let (barrier, queue) = setup(10, 2);
        barrier.update_configuration(&config(json!({"batch_size": 3})));

        let mut state = barrier.on_state("http");
        assert_eq!(*state.borrow_and_update(), BarrierState::Closed);

        queue.pending.publish(3);
        timeout(Duration::from_secs(1), state.changed()).await.unwrap().unwrap();
        assert_eq!(*state.borrow_and_update(), BarrierState::Open);
    }

    #[tokio::test]
    async fn test_configuration_change_recomputes() {
        let (barrier, _queue) = setup(10, 2);
        barrier.update_configuration(&config(json!({"batch_size": 5})));

        let mut state = barrier.on_state("http");
        assert_eq!(*state.borrow_and_update(), BarrierState::Closed);

        barrier.update_configuration(&config(json!({"batch_size": 2})));
        timeout(Duration::from_secs(1), state.changed()).await.unwrap().unwrap();
        assert_eq!(*state.borrow_and_update(), BarrierState::Open);
        assert_eq!(barrier.batch_size(), Some(2));
    }

    #[test]
    fn test_defaults() {
        let (barrier, _queue) = setup(1, 0);
        assert_eq!(barrier.id(), "BatchingBarrier");
        assert!(barrier.is_flushable());
        assert!(barrier.default_scopes().is_none());
    }
}
