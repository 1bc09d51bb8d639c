//! ConsentManager trait - optional consent collaborator

use serde::{Deserialize, Serialize};

use pubsub::Observable;

use crate::{CoreError, DataObject, Dispatch, TrackResult};

/// Opaque consent configuration owned by the consent implementation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsentConfiguration(pub DataObject);

/// Decides which dispatches may be collected and where they may go
pub trait ConsentManager: Send + Sync {
    /// Current configuration; `None` until one is loaded
    fn configuration(&self) -> Observable<Option<ConsentConfiguration>>;

    /// The SDK's own tracking purpose was explicitly refused
    fn sdk_purpose_explicitly_blocked(&self) -> bool;

    /// Accept (and persist) or drop a freshly tracked dispatch
    fn apply_consent(&self, dispatch: Dispatch) -> Result<TrackResult, CoreError>;

    /// Whether `dispatch` may be sent to `dispatcher_id` under `configuration`
    fn matches_configuration(
        &self,
        dispatch: &Dispatch,
        configuration: &ConsentConfiguration,
        dispatcher_id: &str,
    ) -> bool;
}
