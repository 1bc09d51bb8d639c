//! BarrierCoordinator - one Open/Closed gate per dispatcher

use std::sync::Arc;

use contracts::{AppStatus, BarrierState, QueueMetrics, ScopedBarrier};
use pubsub::{changed_any, Observable, StateSubject, Subscription};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

/// Reduces all matching barriers into a single gate per dispatcher
///
/// The gate is Open only when every barrier scoped to `All` or to the
/// dispatcher is Open. While flushing, flushable barriers count as Open until
/// the dispatcher has no pending dispatches left.
pub struct BarrierCoordinator {
    barriers: Observable<Vec<ScopedBarrier>>,
    queue_metrics: Arc<dyn QueueMetrics>,
    flush_requests: Arc<StateSubject<u64>>,
    _app_status: Option<Subscription>,
}

impl BarrierCoordinator {
    pub fn new(barriers: Observable<Vec<ScopedBarrier>>, queue_metrics: Arc<dyn QueueMetrics>) -> Self {
        Self {
            barriers,
            queue_metrics,
            flush_requests: Arc::new(StateSubject::new(0)),
            _app_status: None,
        }
    }

    /// Coordinator with no barriers at all: every gate is Open
    pub fn open(queue_metrics: Arc<dyn QueueMetrics>) -> Self {
        let (_, barriers) = watch::channel(Vec::new());
        Self::new(barriers, queue_metrics)
    }

    /// Flush whenever the host application moves to the background
    pub fn with_app_status(mut self, mut app_status: Observable<AppStatus>) -> Self {
        let flush_requests = Arc::clone(&self.flush_requests);
        app_status.borrow_and_update();

        self._app_status = Some(Subscription::spawn(async move {
            while app_status.changed().await.is_ok() {
                if *app_status.borrow_and_update() == AppStatus::Background {
                    info!("Application backgrounded, flushing");
                    request_flush(&flush_requests);
                }
            }
        }));
        self
    }

    /// Temporarily ignore flushable barriers until each dispatcher has drained
    pub fn flush(&self) {
        debug!("Flush requested");
        request_flush(&self.flush_requests);
    }

    /// Live gate for `dispatcher_id`, emitting distinct states only
    ///
    /// The backing task stops once every receiver has been dropped.
    pub fn on_barriers_state(&self, dispatcher_id: &str) -> Observable<BarrierState> {
        let initial = {
            let barriers = self.barriers.borrow();
            let open = barriers
                .iter()
                .filter(|b| b.matches(dispatcher_id))
                .all(|b| b.barrier.on_state(dispatcher_id).borrow().is_open());
            BarrierState::from_open(open)
        };
        let (tx, rx) = watch::channel(initial);

        let gate = Gate {
            dispatcher_id: dispatcher_id.to_string(),
            barriers: self.barriers.clone(),
            flush_requests: self.flush_requests.subscribe(),
            pending: self.queue_metrics.pending_count(dispatcher_id),
        };
        Subscription::spawn(gate.run(tx)).detach();
        rx
    }
}

fn request_flush(flush_requests: &StateSubject<u64>) {
    flush_requests.update(|generation| {
        *generation = generation.wrapping_add(1);
        true
    });
}

struct Gate {
    dispatcher_id: String,
    barriers: Observable<Vec<ScopedBarrier>>,
    flush_requests: Observable<u64>,
    pending: Observable<usize>,
}

impl Gate {
    #[instrument(name = "barrier_gate", skip(self, tx), fields(dispatcher = %self.dispatcher_id))]
    async fn run(mut self, tx: watch::Sender<BarrierState>) {
        let mut flushing = false;

        loop {
            // Re-derive the matching barriers whenever the barrier set changes
            let scoped: Vec<ScopedBarrier> = self
                .barriers
                .borrow_and_update()
                .iter()
                .filter(|b| b.matches(&self.dispatcher_id))
                .cloned()
                .collect();
            let mut states: Vec<Observable<BarrierState>> = scoped
                .iter()
                .map(|b| b.barrier.on_state(&self.dispatcher_id))
                .collect();

            loop {
                if flushing && *self.pending.borrow_and_update() == 0 {
                    debug!(dispatcher = %self.dispatcher_id, "Flush complete");
                    flushing = false;
                }

                let open = scoped.iter().zip(states.iter_mut()).all(|(b, state)| {
                    state.borrow_and_update().is_open() || (flushing && b.barrier.is_flushable())
                });
                tx.send_if_modified(|current| {
                    let next = BarrierState::from_open(open);
                    if *current != next {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });

                tokio::select! {
                    _ = tx.closed() => return,
                    _ = changed_any(std::slice::from_mut(&mut self.barriers)) => break,
                    _ = changed_any(std::slice::from_mut(&mut self.flush_requests)) => {
                        self.flush_requests.borrow_and_update();
                        flushing = true;
                    }
                    _ = changed_any(std::slice::from_mut(&mut self.pending)) => {}
                    _ = changed_any(&mut states) => {}
                }
            }
        }
    }
}
