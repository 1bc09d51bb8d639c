//! ModuleSet - observable collection of modules keyed by id

use std::sync::Arc;

use contracts::{Barrier, Dispatcher, Transformer};
use pubsub::{Observable, StateSubject};

/// Anything registered by a stable string id
pub trait Module: Send + Sync {
    fn module_id(&self) -> &str;
}

impl Module for dyn Dispatcher {
    fn module_id(&self) -> &str {
        self.id()
    }
}

impl Module for dyn Transformer {
    fn module_id(&self) -> &str {
        self.id()
    }
}

impl Module for dyn Barrier {
    fn module_id(&self) -> &str {
        self.id()
    }
}

/// Runtime-mutable set of modules; subscribers see every change
pub struct ModuleSet<T: ?Sized> {
    modules: StateSubject<Vec<Arc<T>>>,
}

impl<T: ?Sized + Module> ModuleSet<T> {
    pub fn new() -> Self {
        Self {
            modules: StateSubject::new(Vec::new()),
        }
    }

    pub fn from_modules(modules: Vec<Arc<T>>) -> Self {
        let set = Self::new();
        for module in modules {
            set.insert(module);
        }
        set
    }

    /// Add `module`, replacing any module with the same id
    pub fn insert(&self, module: Arc<T>) {
        self.modules.update(|modules| {
            match modules
                .iter()
                .position(|m| m.module_id() == module.module_id())
            {
                Some(idx) => modules[idx] = module,
                None => modules.push(module),
            }
            true
        });
    }

    /// Remove the module with `id`; returns whether one was present
    pub fn remove(&self, id: &str) -> bool {
        self.modules.update(|modules| {
            let before = modules.len();
            modules.retain(|m| m.module_id() != id);
            modules.len() != before
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.modules
            .with(|modules| modules.iter().find(|m| m.module_id() == id).cloned())
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules
            .with(|modules| modules.iter().map(|m| m.module_id().to_string()).collect())
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.modules.value()
    }

    pub fn subscribe(&self) -> Observable<Vec<Arc<T>>> {
        self.modules.subscribe()
    }

    pub fn len(&self) -> usize {
        self.modules.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Module> Default for ModuleSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Dispatch, DispatchCompletion};

    struct Named(&'static str, usize);

    impl Dispatcher for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn dispatch_limit(&self) -> usize {
            self.1
        }

        fn dispatch(&self, _dispatches: Vec<Dispatch>, _completion: DispatchCompletion) {}
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let set: ModuleSet<dyn Dispatcher> = ModuleSet::new();
        set.insert(Arc::new(Named("a", 1)));
        set.insert(Arc::new(Named("b", 1)));
        set.insert(Arc::new(Named("a", 5)));

        assert_eq!(set.ids(), vec!["a", "b"]);
        assert_eq!(set.get("a").unwrap().dispatch_limit(), 5);
    }

    #[tokio::test]
    async fn test_remove_notifies_only_on_change() {
        let set: ModuleSet<dyn Dispatcher> = ModuleSet::from_modules(vec![Arc::new(Named("a", 1))]);
        let mut rx = set.subscribe();
        rx.borrow_and_update();

        assert!(!set.remove("missing"));
        assert!(!rx.has_changed().unwrap());

        assert!(set.remove("a"));
        assert!(rx.has_changed().unwrap());
        assert!(set.is_empty());
    }
}
