//! TransformerCoordinator - runs scoped transformations in order

use std::sync::Arc;

use contracts::{Dispatch, DispatchScope, TransformationSettings, Transformer};
use pubsub::Observable;
use tracing::{debug, warn};

/// Applies every transformation matching a scope, sequentially
///
/// Cancelling a transform means dropping its future: nothing is delivered
/// afterwards.
#[derive(Clone)]
pub struct TransformerCoordinator {
    transformers: Observable<Vec<Arc<dyn Transformer>>>,
    transformations: Observable<Vec<TransformationSettings>>,
}

impl TransformerCoordinator {
    pub fn new(
        transformers: Observable<Vec<Arc<dyn Transformer>>>,
        transformations: Observable<Vec<TransformationSettings>>,
    ) -> Self {
        Self {
            transformers,
            transformations,
        }
    }

    /// Transformations and their transformers currently matching `scope`
    fn resolve(&self, scope: &DispatchScope) -> Vec<(TransformationSettings, Arc<dyn Transformer>)> {
        let transformers = self.transformers.borrow();
        self.transformations
            .borrow()
            .iter()
            .filter(|t| t.scopes.iter().any(|s| s.matches(scope)))
            .filter_map(|t| {
                let transformer = transformers.iter().find(|tr| tr.id() == t.transformer_id);
                if transformer.is_none() {
                    warn!(
                        transformation = %t.id,
                        transformer = %t.transformer_id,
                        "Transformer not registered, skipping transformation"
                    );
                }
                transformer.map(|tr| (t.clone(), Arc::clone(tr)))
            })
            .collect()
    }

    /// Transform one dispatch; `None` means some step dropped it
    pub async fn transform(&self, dispatch: Dispatch, scope: &DispatchScope) -> Option<Dispatch> {
        let steps = self.resolve(scope);
        let mut current = dispatch;
        for (transformation, transformer) in steps {
            match transformer
                .apply_transformation(&transformation, current, scope)
                .await
            {
                Some(next) => current = next,
                None => {
                    debug!(transformation = %transformation.id, %scope, "Dispatch dropped by transformation");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Transform each dispatch independently, keeping survivors in order
    pub async fn transform_all(&self, dispatches: Vec<Dispatch>, scope: &DispatchScope) -> Vec<Dispatch> {
        let mut survivors = Vec::with_capacity(dispatches.len());
        for dispatch in dispatches {
            if let Some(transformed) = self.transform(dispatch, scope).await {
                survivors.push(transformed);
            }
        }
        survivors
    }
}
