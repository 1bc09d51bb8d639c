//! Transformer trait - dispatch mutation hook

use async_trait::async_trait;

use crate::{Dispatch, DispatchScope, TransformationSettings};

/// Mutates dispatches for the transformations that reference it
#[async_trait]
pub trait Transformer: Send + Sync {
    fn id(&self) -> &str;

    /// Apply `transformation` to `dispatch`
    ///
    /// Returning `None` drops the dispatch.
    async fn apply_transformation(
        &self,
        transformation: &TransformationSettings,
        dispatch: Dispatch,
        scope: &DispatchScope,
    ) -> Option<Dispatch>;
}
