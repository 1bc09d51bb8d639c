//! QueueManager - reactive view over the queue repository
//!
//! Tracks in-flight dispatches per processor and publishes live counts:
//! - processors with pending (queued, not in-flight) dispatches
//! - in-flight count per processor
//! - pending count per processor (`QueueMetrics`)

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use contracts::{CoreError, CoreSettings, Dispatch, QueueMetrics, DEFAULT_MAX_IN_FLIGHT};
use parking_lot::Mutex;
use pubsub::{Observable, StateSubject, Subscription};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::QueueRepository;

/// How often a bound manager deletes expired dispatches
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct State {
    max_in_flight: usize,
    /// Non-expired memberships per processor, as of the last refresh
    queued: BTreeMap<String, usize>,
    in_flight: HashMap<String, HashSet<String>>,
    pending_subjects: HashMap<String, StateSubject<usize>>,
    in_flight_subjects: HashMap<String, StateSubject<usize>>,
}

impl State {
    fn in_flight_len(&self, processor: &str) -> usize {
        self.in_flight.get(processor).map_or(0, HashSet::len)
    }

    fn pending(&self, processor: &str) -> usize {
        self.queued
            .get(processor)
            .copied()
            .unwrap_or(0)
            .saturating_sub(self.in_flight_len(processor))
    }
}

struct Inner {
    repository: Mutex<Box<dyn QueueRepository>>,
    state: Mutex<State>,
    processors_with_pending: StateSubject<BTreeSet<String>>,
}

/// Shared handle to the dispatch queue
///
/// Lock order is repository, then state.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Wrap `repository` with the default in-flight ceiling
    pub fn new(repository: impl QueueRepository + 'static) -> Result<Self, CoreError> {
        Self::with_max_in_flight(repository, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_max_in_flight(
        repository: impl QueueRepository + 'static,
        max_in_flight: usize,
    ) -> Result<Self, CoreError> {
        let manager = Self {
            inner: Arc::new(Inner {
                repository: Mutex::new(Box::new(repository)),
                state: Mutex::new(State {
                    max_in_flight,
                    ..Default::default()
                }),
                processors_with_pending: StateSubject::default(),
            }),
        };

        {
            let mut repository = manager.inner.repository.lock();
            let mut state = manager.inner.state.lock();
            manager.refresh(repository.as_mut(), &mut state)?;
        }
        Ok(manager)
    }

    /// Persist `dispatches` for every processor in `processors`
    pub fn store_dispatches(
        &self,
        dispatches: &[Dispatch],
        processors: &BTreeSet<String>,
    ) -> Result<(), CoreError> {
        if dispatches.is_empty() || processors.is_empty() {
            return Ok(());
        }
        let mut repository = self.inner.repository.lock();
        repository.store_dispatches(dispatches, processors)?;
        let mut state = self.inner.state.lock();
        self.refresh(repository.as_mut(), &mut state)
    }

    /// Take up to `limit` pending dispatches for `processor` and mark them in-flight
    ///
    /// Never exceeds the in-flight ceiling; in-flight dispatches are not
    /// returned again until deleted or released.
    pub fn dequeue_dispatches(&self, limit: usize, processor: &str) -> Result<Vec<Dispatch>, CoreError> {
        let mut repository = self.inner.repository.lock();
        let mut state = self.inner.state.lock();

        let available = state.max_in_flight.saturating_sub(state.in_flight_len(processor));
        let count = limit.min(available);
        if count == 0 {
            return Ok(Vec::new());
        }

        let excluding = state.in_flight.get(processor).cloned().unwrap_or_default();
        let dispatches =
            repository.get_queued_dispatches(count as i64, &excluding, processor)?;

        if !dispatches.is_empty() {
            let in_flight = state.in_flight.entry(processor.to_string()).or_default();
            in_flight.extend(dispatches.iter().map(|d| d.id().to_string()));
            debug!(processor = %processor, count = dispatches.len(), "Dequeued dispatches");
            self.publish(&state);
        }
        Ok(dispatches)
    }

    /// Read without marking in-flight; `count` negative means all
    pub fn peek_dispatches(&self, count: i64, processor: &str) -> Result<Vec<Dispatch>, CoreError> {
        self.inner
            .repository
            .lock()
            .get_queued_dispatches(count, &HashSet::new(), processor)
    }

    /// `processor` is done with `dispatch_ids`; they are never returned to it again
    pub fn delete_dispatches(&self, dispatch_ids: &[String], processor: &str) -> Result<(), CoreError> {
        if dispatch_ids.is_empty() {
            return Ok(());
        }
        let mut repository = self.inner.repository.lock();
        repository.delete_dispatches(dispatch_ids, processor)?;

        let mut state = self.inner.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(processor) {
            for id in dispatch_ids {
                in_flight.remove(id);
            }
        }
        self.refresh(repository.as_mut(), &mut state)
    }

    pub fn delete_all_dispatches(&self, processor: &str) -> Result<(), CoreError> {
        let mut repository = self.inner.repository.lock();
        repository.delete_all_dispatches(processor)?;
        let mut state = self.inner.state.lock();
        state.in_flight.remove(processor);
        self.refresh(repository.as_mut(), &mut state)
    }

    /// Drop queues and in-flight bookkeeping of processors not in `processors`
    pub fn delete_queues(&self, processors: &BTreeSet<String>) -> Result<(), CoreError> {
        let mut repository = self.inner.repository.lock();
        repository.delete_queues(processors)?;
        let mut state = self.inner.state.lock();
        state.in_flight.retain(|processor, _| processors.contains(processor));
        self.refresh(repository.as_mut(), &mut state)
    }

    /// Forget in-flight marks of `processor`, making its dispatches eligible again
    pub fn clear_in_flight(&self, processor: &str) {
        let mut state = self.inner.state.lock();
        if state.in_flight.remove(processor).is_some() {
            self.publish(&state);
        }
    }

    /// Apply a new size cap (negative = unbounded)
    pub fn resize(&self, max_queue_size: i64) -> Result<(), CoreError> {
        let mut repository = self.inner.repository.lock();
        repository.resize(max_queue_size)?;
        let mut state = self.inner.state.lock();
        self.refresh(repository.as_mut(), &mut state)
    }

    pub fn set_expiration(&self, expiration: Duration) -> Result<(), CoreError> {
        let mut repository = self.inner.repository.lock();
        repository.set_expiration(expiration)?;
        let mut state = self.inner.state.lock();
        self.refresh(repository.as_mut(), &mut state)
    }

    /// Delete expired entries and republish counts
    pub fn purge_expired(&self) -> Result<usize, CoreError> {
        let mut repository = self.inner.repository.lock();
        let deleted = repository.delete_expired()?;
        let mut state = self.inner.state.lock();
        self.refresh(repository.as_mut(), &mut state)?;
        Ok(deleted)
    }

    pub fn set_max_in_flight(&self, max_in_flight: usize) {
        self.inner.state.lock().max_in_flight = max_in_flight;
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.state.lock().max_in_flight
    }

    /// Live set of processors with at least one pending dispatch
    pub fn enqueued_processors(&self) -> Observable<BTreeSet<String>> {
        self.inner.processors_with_pending.subscribe()
    }

    /// Live in-flight count for `processor`
    pub fn in_flight_count(&self, processor: &str) -> Observable<usize> {
        let mut state = self.inner.state.lock();
        let current = state.in_flight_len(processor);
        state
            .in_flight_subjects
            .entry(processor.to_string())
            .or_insert_with(|| StateSubject::new(current))
            .subscribe()
    }

    /// Stored dispatches (not memberships)
    pub fn size(&self) -> Result<usize, CoreError> {
        self.inner.repository.lock().size()
    }

    /// Follow `settings`, applying size, expiry and in-flight changes as they arrive
    ///
    /// Also sweeps expired dispatches every `EXPIRY_SWEEP_INTERVAL`.
    pub fn bind_settings(&self, settings: Observable<CoreSettings>) -> Subscription {
        self.bind_settings_with_sweep(settings, EXPIRY_SWEEP_INTERVAL)
    }

    pub fn bind_settings_with_sweep(
        &self,
        mut settings: Observable<CoreSettings>,
        sweep: Duration,
    ) -> Subscription {
        let manager = self.clone();
        let mut applied = settings.borrow_and_update().clone();
        manager.set_max_in_flight(applied.max_in_flight);

        Subscription::spawn(async move {
            let mut ticker = tokio::time::interval(sweep);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = settings.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = settings.borrow_and_update().clone();
                        manager.apply_settings(&applied, &next);
                        applied = next;
                    }
                    _ = ticker.tick() => match manager.purge_expired() {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "Purged expired dispatches"),
                        Err(e) => error!(error = %e, "Failed to purge expired dispatches"),
                    },
                }
            }
        })
    }

    fn apply_settings(&self, applied: &CoreSettings, next: &CoreSettings) {
        if next.max_queue_size != applied.max_queue_size {
            match self.resize(next.max_queue_size) {
                Ok(()) => info!(max_queue_size = next.max_queue_size, "Queue resized"),
                Err(e) => error!(error = %e, "Failed to resize queue"),
            }
        }
        if next.expiration_secs != applied.expiration_secs {
            match self.set_expiration(next.expiration()) {
                Ok(()) => info!(expiration_secs = next.expiration_secs, "Queue expiration updated"),
                Err(e) => error!(error = %e, "Failed to update queue expiration"),
            }
        }
        if next.max_in_flight != applied.max_in_flight {
            self.set_max_in_flight(next.max_in_flight);
        }
    }

    /// Re-read queue sizes and drop in-flight marks of evicted or expired ids
    fn refresh(&self, repository: &mut dyn QueueRepository, state: &mut State) -> Result<(), CoreError> {
        state.queued = repository.queue_sizes()?;

        let tracked: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(processor, _)| processor.clone())
            .collect();
        for processor in tracked {
            let queued = repository.queued_ids(&processor)?;
            if let Some(in_flight) = state.in_flight.get_mut(&processor) {
                let before = in_flight.len();
                in_flight.retain(|id| queued.contains(id));
                if in_flight.len() < before {
                    debug!(
                        processor = %processor,
                        dropped = before - in_flight.len(),
                        "In-flight dispatches no longer queued"
                    );
                }
            }
        }

        self.publish(state);
        Ok(())
    }

    fn publish(&self, state: &State) {
        let with_pending: BTreeSet<String> = state
            .queued
            .keys()
            .filter(|processor| state.pending(processor) > 0)
            .cloned()
            .collect();
        self.inner.processors_with_pending.publish_distinct(with_pending);

        for (processor, subject) in &state.pending_subjects {
            subject.publish_distinct(state.pending(processor));
        }
        for (processor, subject) in &state.in_flight_subjects {
            subject.publish_distinct(state.in_flight_len(processor));
        }
    }
}

impl QueueMetrics for QueueManager {
    fn pending_count(&self, processor_id: &str) -> Observable<usize> {
        let mut state = self.inner.state.lock();
        let current = state.pending(processor_id);
        state
            .pending_subjects
            .entry(processor_id.to_string())
            .or_insert_with(|| StateSubject::new(current))
            .subscribe()
    }
}
