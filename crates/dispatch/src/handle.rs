//! DispatcherHandle - one pull loop per registered dispatcher

use std::collections::HashSet;
use std::sync::Arc;

use contracts::{
    ConsentConfiguration, ConsentManager, CoreError, Dispatch, DispatchCompletion, DispatchScope,
    Dispatcher, LoadRuleEngine, QueueMetrics,
};
use observability::DropReason;
use pubsub::{changed_any, DisposeFlag, Observable};
use queue::QueueManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use crate::barriers::BarrierCoordinator;
use crate::mappings::MappingsEngine;
use crate::metrics::DispatcherMetrics;
use crate::transform::TransformerCoordinator;

/// Collaborators shared by every dispatcher loop
pub(crate) struct Pipeline {
    pub queue: QueueManager,
    pub barriers: Arc<BarrierCoordinator>,
    pub transformers: TransformerCoordinator,
    pub mappings: MappingsEngine,
    pub consent: Option<Arc<dyn ConsentManager>>,
    pub load_rules: Arc<dyn LoadRuleEngine>,
}

/// Handle to a running dispatcher loop
pub struct DispatcherHandle {
    id: String,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: Arc<DispatcherMetrics>,
    /// Late completions are ignored once set
    disposed: DisposeFlag,
    stop_tx: watch::Sender<bool>,
    worker_handle: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Spawn the pull loop for `dispatcher`
    pub(crate) fn spawn(
        dispatcher: Arc<dyn Dispatcher>,
        pipeline: Arc<Pipeline>,
        metrics: Arc<DispatcherMetrics>,
    ) -> Self {
        let id = dispatcher.id().to_string();
        let disposed = DisposeFlag::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = DispatchLoop {
            id: id.clone(),
            dispatcher: Arc::clone(&dispatcher),
            pipeline,
            metrics: Arc::clone(&metrics),
            disposed: disposed.clone(),
        };
        let worker_handle = tokio::spawn(worker.run(stop_rx));

        Self {
            id,
            dispatcher,
            metrics,
            disposed,
            stop_tx,
            worker_handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<DispatcherMetrics> {
        &self.metrics
    }

    /// Stop the loop once its current batch has been handed over
    ///
    /// Dispatches already handed to the dispatcher stay queued until a later
    /// loop delivers them again.
    #[instrument(name = "dispatcher_handle_shutdown", skip(self), fields(dispatcher = %self.id))]
    pub async fn shutdown(self) {
        self.disposed.dispose();
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.worker_handle.await {
            error!(dispatcher = %self.id, error = ?e, "Dispatcher loop panicked");
        }
        debug!(dispatcher = %self.id, "DispatcherHandle shutdown complete");
    }
}

struct DispatchLoop {
    id: String,
    dispatcher: Arc<dyn Dispatcher>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<DispatcherMetrics>,
    disposed: DisposeFlag,
}

/// Everything the loop waits on between batches
struct Signals {
    gate: Observable<contracts::BarrierState>,
    pending: Observable<usize>,
    in_flight: Observable<usize>,
    consent: Option<Observable<Option<ConsentConfiguration>>>,
}

impl Signals {
    /// Wait for the next change; false if a stop arrived first
    async fn wait(&mut self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = self.changed() => true,
            _ = stop.changed() => false,
        }
    }

    async fn changed(&mut self) {
        let consent_rx = &mut self.consent;
        let consent = async move {
            match consent_rx.as_mut() {
                Some(rx) => changed_any(std::slice::from_mut(rx)).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = changed_any(std::slice::from_mut(&mut self.gate)) => {}
            _ = changed_any(std::slice::from_mut(&mut self.pending)) => {}
            _ = changed_any(std::slice::from_mut(&mut self.in_flight)) => {}
            _ = consent => {}
        }
    }
}

impl DispatchLoop {
    #[instrument(name = "dispatcher_loop", skip(self), fields(dispatcher = %self.id))]
    async fn run(self, mut stop: watch::Receiver<bool>) {
        let limit = self.dispatcher.dispatch_limit().max(1);
        let queue = &self.pipeline.queue;

        // Anything left in-flight by a previous loop was never acknowledged
        queue.clear_in_flight(&self.id);

        let mut signals = Signals {
            gate: self.pipeline.barriers.on_barriers_state(&self.id),
            pending: queue.pending_count(&self.id),
            in_flight: queue.in_flight_count(&self.id),
            consent: self.pipeline.consent.as_ref().map(|c| c.configuration()),
        };
        debug!(dispatcher = %self.id, limit, "Dispatcher loop started");

        // stop is only observed between batches, so a dequeue never outlives its loop
        while !*stop.borrow_and_update() {
            let open = signals.gate.borrow_and_update().is_open();
            let consent_config = signals
                .consent
                .as_mut()
                .map(|rx| rx.borrow_and_update().clone());
            let pending = *signals.pending.borrow_and_update();
            signals.in_flight.borrow_and_update();

            self.metrics.set_pending(pending);
            observability::record_queue_pending(&self.id, pending);

            if !open || matches!(consent_config, Some(None)) || pending == 0 {
                if !signals.wait(&mut stop).await {
                    break;
                }
                continue;
            }

            let batch = match self.dequeue(limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.metrics.inc_failure_count();
                    error!(dispatcher = %self.id, error = %e, "Failed to dequeue dispatches");
                    if !signals.wait(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };
            if batch.is_empty() {
                if !signals.wait(&mut stop).await {
                    break;
                }
                continue;
            }

            let full = batch.len() == limit;
            self.process(batch, consent_config.flatten()).await;
            if !full && !signals.wait(&mut stop).await {
                break;
            }
        }
        debug!(dispatcher = %self.id, "Dispatcher loop stopped");
    }

    async fn dequeue(&self, limit: usize) -> Result<Vec<Dispatch>, CoreError> {
        let queue = self.pipeline.queue.clone();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || queue.dequeue_dispatches(limit, &id))
            .await
            .map_err(|e| CoreError::storage("dequeue", e.to_string()))?
    }

    async fn delete(&self, ids: Vec<String>) -> Result<(), CoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let queue = self.pipeline.queue.clone();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || queue.delete_dispatches(&ids, &id))
            .await
            .map_err(|e| CoreError::storage("delete", e.to_string()))?
    }

    /// Consent, transformations, load rules and mappings, then hand over
    async fn process(&self, batch: Vec<Dispatch>, consent_config: Option<ConsentConfiguration>) {
        let mut dropped: Vec<String> = Vec::new();

        let permitted = match (&self.pipeline.consent, &consent_config) {
            (Some(consent), Some(config)) => {
                let (permitted, blocked): (Vec<_>, Vec<_>) = batch
                    .into_iter()
                    .partition(|d| consent.matches_configuration(d, config, &self.id));
                self.note_dropped(&mut dropped, blocked.iter().map(|d| d.id().to_string()), DropReason::Consent);
                permitted
            }
            _ => batch,
        };

        let scope = DispatchScope::Dispatcher(self.id.clone());
        let permitted_ids = ids_of(&permitted);
        let transformed = self.pipeline.transformers.transform_all(permitted, &scope).await;
        self.note_dropped(&mut dropped, missing(permitted_ids, &transformed), DropReason::Transformation);

        let candidates = ids_of(&transformed);
        let (passed, _rejected) = self
            .pipeline
            .load_rules
            .evaluate_load_rules(&self.id, transformed);
        self.note_dropped(&mut dropped, missing(candidates, &passed), DropReason::LoadRules);

        if let Err(e) = self.delete(dropped).await {
            self.metrics.inc_failure_count();
            error!(dispatcher = %self.id, error = %e, "Failed to remove dropped dispatches");
        }

        if passed.is_empty() {
            return;
        }
        let mapped: Vec<Dispatch> = passed
            .into_iter()
            .map(|d| self.pipeline.mappings.map(&self.id, d))
            .collect();

        let count = mapped.len();
        debug!(dispatcher = %self.id, count, "Dispatching");
        self.metrics.add_sent(count);
        observability::record_sent(&self.id, count);
        self.dispatcher.dispatch(mapped, self.completion());
    }

    fn note_dropped(
        &self,
        dropped: &mut Vec<String>,
        ids: impl IntoIterator<Item = String>,
        reason: DropReason,
    ) {
        let before = dropped.len();
        dropped.extend(ids);
        let count = dropped.len() - before;
        if count > 0 {
            debug!(dispatcher = %self.id, count, reason = reason.as_str(), "Dropping dispatches");
            self.metrics.add_dropped(count);
            observability::record_dropped(&self.id, reason, count);
        }
    }

    /// Deletes acknowledged dispatches; ignored once the loop is disposed
    fn completion(&self) -> DispatchCompletion {
        let queue = self.pipeline.queue.clone();
        let id = self.id.clone();
        let metrics = Arc::clone(&self.metrics);
        let disposed = self.disposed.clone();

        DispatchCompletion::new(move |completed: Vec<Dispatch>| {
            if disposed.is_disposed() {
                debug!(dispatcher = %id, count = completed.len(), "Ignoring completion after shutdown");
                return;
            }
            let now = chrono::Utc::now().timestamp_millis();
            for dispatch in &completed {
                observability::record_delivery_latency_ms(&id, (now - dispatch.timestamp()) as f64);
            }

            let ids: Vec<String> = completed.iter().map(|d| d.id().to_string()).collect();
            let queue = queue.clone();
            let id = id.clone();
            let metrics = Arc::clone(&metrics);
            let acknowledge = move || match queue.delete_dispatches(&ids, &id) {
                Ok(()) => {
                    metrics.add_completed(ids.len());
                    observability::record_completed(&id, ids.len());
                }
                Err(e) => {
                    metrics.inc_failure_count();
                    warn!(dispatcher = %id, error = %e, "Failed to delete completed dispatches");
                }
            };

            // Completions may arrive from any thread, with or without a runtime
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(acknowledge);
                }
                Err(_) => acknowledge(),
            }
        })
    }
}

fn ids_of(dispatches: &[Dispatch]) -> Vec<String> {
    dispatches.iter().map(|d| d.id().to_string()).collect()
}

/// Ids from `before` with no dispatch left in `after`
fn missing(before: Vec<String>, after: &[Dispatch]) -> Vec<String> {
    let kept: HashSet<&str> = after.iter().map(Dispatch::id).collect();
    before
        .into_iter()
        .filter(|id| !kept.contains(id.as_str()))
        .collect()
}
