//! Per-section views of the live settings document

use std::collections::BTreeMap;

use contracts::{BarrierSettings, CoreSettings, MappingOperation, SdkSettings, TransformationSettings};
use pubsub::{map_distinct, Observable, SubscriptionSet};

/// Each settings section as its own distinct-until-changed stream
///
/// Consumers only wake when their own section changes. Dropping this value
/// stops the derivations.
pub struct SettingsStreams {
    pub core: Observable<CoreSettings>,
    pub barriers: Observable<BTreeMap<String, BarrierSettings>>,
    pub transformations: Observable<Vec<TransformationSettings>>,
    pub mappings: Observable<BTreeMap<String, Vec<MappingOperation>>>,
    _subscriptions: SubscriptionSet,
}

impl SettingsStreams {
    pub fn new(settings: Observable<SdkSettings>) -> Self {
        let mut subscriptions = SubscriptionSet::new();

        let (core, sub) = map_distinct(settings.clone(), |s| s.core.clone());
        subscriptions.add(sub);
        let (barriers, sub) = map_distinct(settings.clone(), |s| s.barriers.clone());
        subscriptions.add(sub);
        let (transformations, sub) = map_distinct(settings.clone(), |s| s.transformations.clone());
        subscriptions.add(sub);
        let (mappings, sub) = map_distinct(settings, |s| s.mappings.clone());
        subscriptions.add(sub);

        Self {
            core,
            barriers,
            transformations,
            mappings,
            _subscriptions: subscriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubsub::StateSubject;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_only_changed_sections_emit() {
        let settings = StateSubject::new(SdkSettings::default());
        let mut streams = SettingsStreams::new(settings.subscribe());
        streams.core.borrow_and_update();
        streams.mappings.borrow_and_update();

        settings.update(|s| {
            s.core.max_queue_size = 5;
            true
        });

        timeout(Duration::from_secs(1), streams.core.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(streams.core.borrow_and_update().max_queue_size, 5);
        assert!(timeout(Duration::from_millis(50), streams.mappings.changed())
            .await
            .is_err());
    }
}
