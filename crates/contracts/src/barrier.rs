//! Barrier trait - admission gate for dispatchers

use std::sync::Arc;

use pubsub::Observable;

use crate::{BarrierScope, BarrierState, DataObject};

/// A gate that decides whether a dispatcher may currently send
pub trait Barrier: Send + Sync {
    fn id(&self) -> &str;

    /// Live state of this barrier for `dispatcher_id`
    fn on_state(&self, dispatcher_id: &str) -> Observable<BarrierState>;

    /// Whether a flush may override a Closed state
    fn is_flushable(&self) -> bool {
        true
    }

    /// Scopes used when settings do not name any
    fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
        None
    }

    /// Barrier-specific settings changed
    fn update_configuration(&self, _configuration: &DataObject) {}
}

/// A barrier together with the dispatchers it applies to
#[derive(Clone)]
pub struct ScopedBarrier {
    pub barrier: Arc<dyn Barrier>,
    pub scopes: Vec<BarrierScope>,
}

impl ScopedBarrier {
    pub fn new(barrier: Arc<dyn Barrier>, scopes: Vec<BarrierScope>) -> Self {
        Self { barrier, scopes }
    }

    /// Whether this barrier gates `dispatcher_id`
    pub fn matches(&self, dispatcher_id: &str) -> bool {
        self.scopes.iter().any(|scope| scope.matches(dispatcher_id))
    }
}

impl std::fmt::Debug for ScopedBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBarrier")
            .field("barrier", &self.barrier.id())
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Host application lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppStatus {
    #[default]
    Foreground,
    Background,
}
