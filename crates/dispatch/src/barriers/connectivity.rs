//! ConnectivityBarrier - closed while the device is offline

use contracts::{Barrier, BarrierScope, BarrierState};
use pubsub::{map_distinct, Observable};

/// Open iff the connectivity source reports a connection
///
/// Never flushable: flushing while offline would only fail every dispatch.
pub struct ConnectivityBarrier {
    connected: Observable<bool>,
}

impl ConnectivityBarrier {
    pub const ID: &'static str = "ConnectivityBarrier";

    pub fn new(connected: Observable<bool>) -> Self {
        Self { connected }
    }
}

impl Barrier for ConnectivityBarrier {
    fn id(&self) -> &str {
        Self::ID
    }

    fn on_state(&self, _dispatcher_id: &str) -> Observable<BarrierState> {
        let (state, subscription) = map_distinct(self.connected.clone(), |connected| {
            BarrierState::from_open(*connected)
        });
        subscription.detach();
        state
    }

    fn is_flushable(&self) -> bool {
        false
    }

    fn default_scopes(&self) -> Option<Vec<BarrierScope>> {
        Some(vec![BarrierScope::All])
    }
}
