//! DispatchRuntime - wires the pipeline from a live settings document

use std::sync::Arc;

use contracts::{
    AppStatus, Barrier, ConsentManager, Dispatcher, LoadRuleEngine, SdkSettings, Transformer,
};
use pubsub::{Observable, SubscriptionSet};
use queue::{QueueManager, QueueRepository};
use tracing::info;

use crate::barriers::{BarrierCoordinator, BarrierManager, BatchingBarrier, ConnectivityBarrier};
use crate::error::DispatchError;
use crate::manager::DispatchManager;
use crate::mappings::MappingsEngine;
use crate::registry::ModuleSet;
use crate::settings::SettingsStreams;
use crate::transform::TransformerCoordinator;

/// Optional inputs from the host
#[derive(Default)]
pub struct RuntimeOptions {
    /// Enables the connectivity barrier when present
    pub connectivity: Option<Observable<bool>>,
    /// Backgrounding triggers a flush
    pub app_status: Option<Observable<AppStatus>>,
    pub consent: Option<Arc<dyn ConsentManager>>,
    pub load_rules: Option<Arc<dyn LoadRuleEngine>>,
    /// Barriers besides the built-in ones, scoped from settings
    pub barriers: Vec<Arc<dyn Barrier>>,
}

/// A fully wired dispatch pipeline
///
/// Settings changes are applied live: queue limits, barrier scopes and
/// configuration, transformations and mappings.
pub struct DispatchRuntime {
    manager: DispatchManager,
    queue: QueueManager,
    dispatchers: Arc<ModuleSet<dyn Dispatcher>>,
    transformers: Arc<ModuleSet<dyn Transformer>>,
    barrier_manager: Arc<BarrierManager>,
    _streams: SettingsStreams,
    _subscriptions: SubscriptionSet,
}

impl DispatchRuntime {
    /// Must be called within a tokio runtime
    pub fn new(
        settings: Observable<SdkSettings>,
        repository: impl QueueRepository + 'static,
        options: RuntimeOptions,
    ) -> Result<Self, DispatchError> {
        let streams = SettingsStreams::new(settings);
        let mut subscriptions = SubscriptionSet::new();

        let core = streams.core.borrow().clone();
        let queue = QueueManager::with_max_in_flight(repository, core.max_in_flight)?;
        subscriptions.add(queue.bind_settings(streams.core.clone()));

        let dispatchers: Arc<ModuleSet<dyn Dispatcher>> = Arc::new(ModuleSet::new());
        let transformers: Arc<ModuleSet<dyn Transformer>> = Arc::new(ModuleSet::new());

        let mut builtin: Vec<Arc<dyn Barrier>> = vec![Arc::new(BatchingBarrier::new(
            dispatchers.subscribe(),
            Arc::new(queue.clone()),
        ))];
        if let Some(connectivity) = options.connectivity {
            builtin.push(Arc::new(ConnectivityBarrier::new(connectivity)));
        }
        builtin.extend(options.barriers);

        let barrier_manager = Arc::new(BarrierManager::new(builtin));
        subscriptions.add(barrier_manager.bind_settings(streams.barriers.clone()));

        let mut coordinator =
            BarrierCoordinator::new(barrier_manager.scoped_barriers(), Arc::new(queue.clone()));
        if let Some(app_status) = options.app_status {
            coordinator = coordinator.with_app_status(app_status);
        }

        let mut builder = DispatchManager::builder()
            .queue(queue.clone())
            .dispatchers(Arc::clone(&dispatchers))
            .barrier_coordinator(Arc::new(coordinator))
            .transformer_coordinator(TransformerCoordinator::new(
                transformers.subscribe(),
                streams.transformations.clone(),
            ))
            .mappings(MappingsEngine::new(streams.mappings.clone()));
        if let Some(consent) = options.consent {
            builder = builder.consent(consent);
        }
        if let Some(load_rules) = options.load_rules {
            builder = builder.load_rules(load_rules);
        }

        info!(
            max_queue_size = core.max_queue_size,
            expiration_secs = core.expiration_secs,
            max_in_flight = core.max_in_flight,
            "Dispatch runtime created"
        );

        Ok(Self {
            manager: builder.build()?,
            queue,
            dispatchers,
            transformers,
            barrier_manager,
            _streams: streams,
            _subscriptions: subscriptions,
        })
    }

    pub fn manager(&self) -> &DispatchManager {
        &self.manager
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn dispatchers(&self) -> &Arc<ModuleSet<dyn Dispatcher>> {
        &self.dispatchers
    }

    pub fn transformers(&self) -> &Arc<ModuleSet<dyn Transformer>> {
        &self.transformers
    }

    pub fn barrier_manager(&self) -> &Arc<BarrierManager> {
        &self.barrier_manager
    }
}
