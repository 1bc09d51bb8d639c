//! LogDispatcher - logs dispatch summaries via tracing

use contracts::{Dispatch, DispatchCompletion, Dispatcher};
use tracing::{info, instrument};

/// Dispatcher that logs each dispatch and acknowledges it immediately
pub struct LogDispatcher {
    id: String,
    dispatch_limit: usize,
}

impl LogDispatcher {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_limit(id, 1)
    }

    pub fn with_limit(id: impl Into<String>, dispatch_limit: usize) -> Self {
        Self {
            id: id.into(),
            dispatch_limit: dispatch_limit.max(1),
        }
    }
}

impl Dispatcher for LogDispatcher {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch_limit(&self) -> usize {
        self.dispatch_limit
    }

    #[instrument(
        name = "log_dispatcher_dispatch",
        skip(self, dispatches, completion),
        fields(dispatcher = %self.id, count = dispatches.len())
    )]
    fn dispatch(&self, dispatches: Vec<Dispatch>, completion: DispatchCompletion) {
        for dispatch in &dispatches {
            info!(
                dispatcher = %self.id,
                dispatch = %dispatch.log_description(),
                event_type = dispatch.dispatch_type().map(|t| t.friendly_name()),
                keys = dispatch.payload().len(),
                "Dispatch delivered"
            );
        }
        completion.complete(dispatches);
    }
}
