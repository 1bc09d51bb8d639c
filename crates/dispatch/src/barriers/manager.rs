//! BarrierManager - resolves barrier scopes from settings

use std::collections::BTreeMap;
use std::sync::Arc;

use contracts::{Barrier, BarrierScope, BarrierSettings, ScopedBarrier};
use parking_lot::Mutex;
use pubsub::{Observable, StateSubject, Subscription};
use tracing::{debug, info};

#[derive(Default)]
struct Registry {
    /// Barriers known at startup; scoped from settings
    builtin: Vec<Arc<dyn Barrier>>,
    /// Barriers registered at runtime with explicit scopes
    extra: Vec<ScopedBarrier>,
    settings: BTreeMap<String, BarrierSettings>,
}

/// Owns the live list of scoped barriers
///
/// Scope of a built-in barrier: settings scopes, else its default scopes,
/// else `All`. Runtime registrations override a built-in with the same id.
pub struct BarrierManager {
    registry: Mutex<Registry>,
    barriers: StateSubject<Vec<ScopedBarrier>>,
}

impl BarrierManager {
    pub fn new(builtin: Vec<Arc<dyn Barrier>>) -> Self {
        let manager = Self {
            registry: Mutex::new(Registry {
                builtin,
                ..Default::default()
            }),
            barriers: StateSubject::new(Vec::new()),
        };
        manager.republish(&manager.registry.lock());
        manager
    }

    /// Apply barrier settings: scopes and per-barrier configuration
    pub fn update_settings(&self, settings: BTreeMap<String, BarrierSettings>) {
        let mut registry = self.registry.lock();
        for barrier in &registry.builtin {
            if let Some(barrier_settings) = settings.get(barrier.id()) {
                barrier.update_configuration(&barrier_settings.configuration);
            }
        }
        registry.settings = settings;
        self.republish(&registry);
    }

    /// Follow barrier settings as they change
    pub fn bind_settings(
        self: &Arc<Self>,
        mut settings: Observable<BTreeMap<String, BarrierSettings>>,
    ) -> Subscription {
        self.update_settings(settings.borrow_and_update().clone());
        let manager = Arc::clone(self);
        Subscription::spawn(async move {
            while settings.changed().await.is_ok() {
                let next = settings.borrow_and_update().clone();
                manager.update_settings(next);
            }
        })
    }

    /// Add a barrier with explicit scopes, replacing one with the same id
    pub fn register_scoped_barrier(&self, barrier: Arc<dyn Barrier>, scopes: Vec<BarrierScope>) {
        let mut registry = self.registry.lock();
        let id = barrier.id().to_string();
        registry.extra.retain(|b| b.barrier.id() != id);
        registry.extra.push(ScopedBarrier::new(barrier, scopes));
        info!(barrier = %id, "Barrier registered");
        self.republish(&registry);
    }

    /// Remove a runtime-registered barrier; returns whether one was present
    pub fn unregister_scoped_barrier(&self, id: &str) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.extra.len();
        registry.extra.retain(|b| b.barrier.id() != id);
        let removed = registry.extra.len() != before;
        if removed {
            info!(barrier = %id, "Barrier unregistered");
            self.republish(&registry);
        }
        removed
    }

    pub fn scoped_barriers(&self) -> Observable<Vec<ScopedBarrier>> {
        self.barriers.subscribe()
    }

    pub fn snapshot(&self) -> Vec<ScopedBarrier> {
        self.barriers.value()
    }

    fn republish(&self, registry: &Registry) {
        let mut scoped: Vec<ScopedBarrier> = registry
            .builtin
            .iter()
            .filter(|b| !registry.extra.iter().any(|e| e.barrier.id() == b.id()))
            .map(|barrier| {
                let scopes = registry
                    .settings
                    .get(barrier.id())
                    .and_then(|s| s.scopes.clone())
                    .or_else(|| barrier.default_scopes())
                    .unwrap_or_else(|| vec![BarrierScope::All]);
                ScopedBarrier::new(Arc::clone(barrier), scopes)
            })
            .collect();
        scoped.extend(registry.extra.iter().cloned());

        debug!(barriers = scoped.len(), "Barrier set updated");
        self.barriers.publish(scoped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barriers::test_support::FixedBarrier;
    use contracts::{BarrierState, DataObject};
    use serde_json::json;

    fn scopes_of(manager: &BarrierManager, id: &str) -> Option<Vec<BarrierScope>> {
        manager
            .snapshot()
            .into_iter()
            .find(|b| b.barrier.id() == id)
            .map(|b| b.scopes)
    }

    #[tokio::test]
    async fn test_scope_falls_back_to_all() {
        let manager = BarrierManager::new(vec![FixedBarrier::arc("b", BarrierState::Open)]);
        assert_eq!(scopes_of(&manager, "b"), Some(vec![BarrierScope::All]));
    }

    #[tokio::test]
    async fn test_default_scope_used_without_settings() {
        let barrier = FixedBarrier::new("b", BarrierState::Open)
            .with_default_scopes(vec![BarrierScope::Dispatcher("x".into())]);
        let manager = BarrierManager::new(vec![Arc::new(barrier)]);
        assert_eq!(
            scopes_of(&manager, "b"),
            Some(vec![BarrierScope::Dispatcher("x".into())])
        );
    }

    #[tokio::test]
    async fn test_settings_scope_wins_and_configuration_forwarded() {
        let barrier = Arc::new(
            FixedBarrier::new("b", BarrierState::Open).with_default_scopes(vec![BarrierScope::All]),
        );
        let manager = BarrierManager::new(vec![barrier.clone() as Arc<dyn Barrier>]);

        let mut configuration = DataObject::new();
        configuration.insert("batch_size".into(), json!(3));
        manager.update_settings(BTreeMap::from([(
            "b".to_string(),
            BarrierSettings {
                scopes: Some(vec![BarrierScope::Dispatcher("y".into())]),
                configuration: configuration.clone(),
            },
        )]));

        assert_eq!(
            scopes_of(&manager, "b"),
            Some(vec![BarrierScope::Dispatcher("y".into())])
        );
        assert_eq!(barrier.last_configuration(), Some(configuration));
    }

    #[tokio::test]
    async fn test_register_replaces_and_unregister_removes() {
        let manager = BarrierManager::new(vec![FixedBarrier::arc("b", BarrierState::Open)]);
        let mut rx = manager.scoped_barriers();
        rx.borrow_and_update();

        manager.register_scoped_barrier(
            FixedBarrier::arc("b", BarrierState::Closed),
            vec![BarrierScope::Dispatcher("z".into())],
        );
        assert!(rx.has_changed().unwrap());
        assert_eq!(manager.snapshot().len(), 1);
        assert_eq!(
            scopes_of(&manager, "b"),
            Some(vec![BarrierScope::Dispatcher("z".into())])
        );

        assert!(manager.unregister_scoped_barrier("b"));
        assert_eq!(scopes_of(&manager, "b"), Some(vec![BarrierScope::All]));
        assert!(!manager.unregister_scoped_barrier("b"));
    }
}
