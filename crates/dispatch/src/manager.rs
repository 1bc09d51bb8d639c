//! DispatchManager - accepts dispatches and runs one loop per dispatcher

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use contracts::{
    AllowAllLoadRules, ConsentManager, CoreError, Dispatch, DispatchScope, Dispatcher, LoadRuleEngine,
    TrackResult,
};
use parking_lot::Mutex;
use pubsub::{changed_any, Observable};
use queue::QueueManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::barriers::BarrierCoordinator;
use crate::error::DispatchError;
use crate::handle::{DispatcherHandle, Pipeline};
use crate::mappings::MappingsEngine;
use crate::metrics::{DispatcherMetrics, MetricsSnapshot};
use crate::registry::ModuleSet;
use crate::transform::TransformerCoordinator;

type MetricsMap = Arc<Mutex<BTreeMap<String, Arc<DispatcherMetrics>>>>;

/// Orchestrates tracking and delivery
///
/// `track` only queues; delivery happens in per-dispatcher loops started by
/// `start` and re-derived whenever the dispatcher set changes.
pub struct DispatchManager {
    pipeline: Arc<Pipeline>,
    dispatchers: Arc<ModuleSet<dyn Dispatcher>>,
    metrics: MetricsMap,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Supervisor {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DispatchManager {
    pub fn builder() -> DispatchManagerBuilder {
        DispatchManagerBuilder::default()
    }

    pub fn queue(&self) -> &QueueManager {
        &self.pipeline.queue
    }

    pub fn dispatchers(&self) -> &Arc<ModuleSet<dyn Dispatcher>> {
        &self.dispatchers
    }

    /// Accept `dispatch` for delivery to every registered dispatcher
    ///
    /// `Accepted` means durably queued, not delivered.
    #[instrument(name = "dispatch_track", skip(self, dispatch), fields(dispatch = %dispatch.log_description()))]
    pub async fn track(&self, dispatch: Dispatch) -> Result<TrackResult, CoreError> {
        let result = self.track_dispatch(dispatch).await;
        match &result {
            Ok(result) => {
                debug!(status = result.status.as_str(), info = %result.info, "Tracked");
                observability::record_track(result.status);
            }
            Err(e) => {
                error!(error = %e, "Failed to track dispatch");
                observability::record_track_failure();
            }
        }
        result
    }

    async fn track_dispatch(&self, dispatch: Dispatch) -> Result<TrackResult, CoreError> {
        if let Some(consent) = &self.pipeline.consent {
            if consent.sdk_purpose_explicitly_blocked() {
                return Ok(TrackResult::dropped(dispatch, "Tracking purpose explicitly blocked"));
            }
        }

        let original = dispatch.clone();
        let Some(dispatch) = self
            .pipeline
            .transformers
            .transform(dispatch, &DispatchScope::AfterCollectors)
            .await
        else {
            return Ok(TrackResult::dropped(original, "Dropped by transformation"));
        };

        if let Some(consent) = &self.pipeline.consent {
            return consent.apply_consent(dispatch);
        }

        let processors: BTreeSet<String> = self.dispatchers.ids().into_iter().collect();
        let count = processors.len();
        let queue = self.pipeline.queue.clone();
        let stored = dispatch.clone();
        tokio::task::spawn_blocking(move || queue.store_dispatches(&[stored], &processors))
            .await
            .map_err(|e| CoreError::storage("store", e.to_string()))??;

        Ok(TrackResult::accepted(dispatch, format!("Queued for {count} dispatchers")))
    }

    /// Start delivery; a second call while running is ignored
    pub fn start(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            warn!("DispatchManager already started");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.pipeline),
            self.dispatchers.subscribe(),
            Arc::clone(&self.metrics),
            stop_rx,
        ));
        *supervisor = Some(Supervisor { stop_tx, handle });
        info!("DispatchManager started");
    }

    /// Stop every dispatcher loop; queued dispatches stay queued
    #[instrument(name = "dispatch_manager_stop", skip(self))]
    pub async fn stop(&self) {
        let Some(supervisor) = self.supervisor.lock().take() else {
            return;
        };
        let _ = supervisor.stop_tx.send(true);
        if let Err(e) = supervisor.handle.await {
            error!(error = ?e, "Dispatch supervisor panicked");
        }
        info!("DispatchManager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.lock().is_some()
    }

    /// Open flushable barriers until every dispatcher has drained
    pub fn flush(&self) {
        self.pipeline.barriers.flush();
    }

    /// Counters per dispatcher that has run since construction
    pub fn metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.metrics
            .lock()
            .iter()
            .map(|(id, metrics)| (id.clone(), metrics.snapshot()))
            .collect()
    }
}

/// Owns the loop handles; reconciles them with the dispatcher set
#[instrument(name = "dispatch_supervisor", skip_all)]
async fn supervise(
    pipeline: Arc<Pipeline>,
    mut dispatchers: Observable<Vec<Arc<dyn Dispatcher>>>,
    metrics: MetricsMap,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut handles: BTreeMap<String, DispatcherHandle> = BTreeMap::new();

    loop {
        let current = dispatchers.borrow_and_update().clone();
        reconcile(&pipeline, &current, &mut handles, &metrics).await;

        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = changed_any(std::slice::from_mut(&mut dispatchers)) => {}
        }
    }

    for (_, handle) in handles {
        handle.shutdown().await;
    }
}

async fn reconcile(
    pipeline: &Arc<Pipeline>,
    current: &[Arc<dyn Dispatcher>],
    handles: &mut BTreeMap<String, DispatcherHandle>,
    metrics: &MetricsMap,
) {
    let queue = pipeline.queue.clone();
    let keep: BTreeSet<String> = current.iter().map(|d| d.id().to_string()).collect();
    match tokio::task::spawn_blocking(move || queue.delete_queues(&keep)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Failed to delete queues of removed dispatchers"),
        Err(e) => error!(error = %e, "Queue cleanup task failed"),
    }

    let stale: Vec<String> = handles
        .iter()
        .filter(|(id, handle)| {
            !current
                .iter()
                .any(|d| d.id() == id.as_str() && same_module(d, handle.dispatcher()))
        })
        .map(|(id, _)| id.clone())
        .collect();
    for id in stale {
        if let Some(handle) = handles.remove(&id) {
            info!(dispatcher = %id, "Stopping dispatcher loop");
            handle.shutdown().await;
        }
    }

    for dispatcher in current {
        let id = dispatcher.id();
        if handles.contains_key(id) {
            continue;
        }
        let loop_metrics = Arc::clone(metrics.lock().entry(id.to_string()).or_default());
        info!(dispatcher = %id, limit = dispatcher.dispatch_limit(), "Starting dispatcher loop");
        handles.insert(
            id.to_string(),
            DispatcherHandle::spawn(Arc::clone(dispatcher), Arc::clone(pipeline), loop_metrics),
        );
    }
}

fn same_module(a: &Arc<dyn Dispatcher>, b: &Arc<dyn Dispatcher>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Builder for `DispatchManager`; only the queue is required
#[derive(Default)]
pub struct DispatchManagerBuilder {
    queue: Option<QueueManager>,
    dispatchers: Option<Arc<ModuleSet<dyn Dispatcher>>>,
    barriers: Option<Arc<BarrierCoordinator>>,
    transformers: Option<TransformerCoordinator>,
    mappings: Option<MappingsEngine>,
    consent: Option<Arc<dyn ConsentManager>>,
    load_rules: Option<Arc<dyn LoadRuleEngine>>,
}

impl DispatchManagerBuilder {
    pub fn queue(mut self, queue: QueueManager) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn dispatchers(mut self, dispatchers: Arc<ModuleSet<dyn Dispatcher>>) -> Self {
        self.dispatchers = Some(dispatchers);
        self
    }

    pub fn barrier_coordinator(mut self, barriers: Arc<BarrierCoordinator>) -> Self {
        self.barriers = Some(barriers);
        self
    }

    pub fn transformer_coordinator(mut self, transformers: TransformerCoordinator) -> Self {
        self.transformers = Some(transformers);
        self
    }

    pub fn mappings(mut self, mappings: MappingsEngine) -> Self {
        self.mappings = Some(mappings);
        self
    }

    pub fn consent(mut self, consent: Arc<dyn ConsentManager>) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn load_rules(mut self, load_rules: Arc<dyn LoadRuleEngine>) -> Self {
        self.load_rules = Some(load_rules);
        self
    }

    pub fn build(self) -> Result<DispatchManager, DispatchError> {
        let queue = self.queue.ok_or(DispatchError::MissingComponent("queue"))?;

        let barriers = self
            .barriers
            .unwrap_or_else(|| Arc::new(BarrierCoordinator::open(Arc::new(queue.clone()))));
        let transformers = self.transformers.unwrap_or_else(|| {
            let (_, transformers) = watch::channel(Vec::new());
            let (_, transformations) = watch::channel(Vec::new());
            TransformerCoordinator::new(transformers, transformations)
        });

        Ok(DispatchManager {
            pipeline: Arc::new(Pipeline {
                queue,
                barriers,
                transformers,
                mappings: self
                    .mappings
                    .unwrap_or_else(|| MappingsEngine::fixed(BTreeMap::new())),
                consent: self.consent,
                load_rules: self.load_rules.unwrap_or_else(|| Arc::new(AllowAllLoadRules)),
            }),
            dispatchers: self.dispatchers.unwrap_or_default(),
            metrics: MetricsMap::default(),
            supervisor: Mutex::new(None),
        })
    }
}

impl Drop for DispatchManager {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            let _ = supervisor.stop_tx.send(true);
        }
    }
}
