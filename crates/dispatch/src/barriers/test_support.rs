//! Controllable barrier for unit tests

use std::sync::Arc;

use contracts::{Barrier, BarrierScope, BarrierState, DataObject};
use parking_lot::Mutex;
use pubsub::{Observable, StateSubject};

pub(crate) struct FixedBarrier {
    id: String,
    state: StateSubject<BarrierState>,
    flushable: bool,
    default_scopes: Option<Vec<BarrierScope>>,
    configuration: Mutex<Option<DataObject>>,
}

impl FixedBarrier {
    pub(crate) fn new(id: &str, state: BarrierState) -> Self {
        Self {
            id: id.to_string(),
            state: StateSubject::new(state),
            flushable: true,
            default_scopes: None,
            configuration: Mutex::new(None),
        }
    }

    pub(crate) fn arc(id: &str, state: BarrierState) -> Arc<dyn Barrier> {
        Arc::new(Self::new(id, state))
    }

    pub(crate) fn not_flushable(mut self) -> Self {
        self.flushable = false;
        self
    }

    pub(crate) fn with_default_scopes(mut self, scopes: Vec<BarrierScope>) -> Self {
        self.default_scopes = Some(scopes);
        self
    }

    pub(crate) fn set_state(&self, state: BarrierState) {
        self.state.publish(state);
    }

    pub(crate) fn last_configuration(&self) -> Option<DataObject> {
        self.configuration.lock().clone()
    }
}

impl Barrier for FixedBarrier {
    fn id(&self) -> &str {
        &self.id
    }

    fn on_state(&self, _dispatcher_id: &str) -> Observable<BarrierState> {
        self.state.subscribe()
    }

    fn is_flushable(&self) -> bool {
        self.flushable
    }

    fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
        self.default_scopes.clone()
    }

    fn update_configuration(&self, configuration: &DataObject) {
        *self.configuration.lock() = Some(configuration.clone());
    }
}
