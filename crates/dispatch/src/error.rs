//! Dispatch error types

use thiserror::Error;

/// Dispatch-specific errors
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Built-in dispatcher could not be created
    #[error("failed to create dispatcher '{id}': {message}")]
    DispatcherCreation { id: String, message: String },

    /// A dispatcher with this id is already registered
    #[error("dispatcher '{0}' is already registered")]
    DuplicateDispatcher(String),

    /// Builder finished without a required component
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    /// Storage or configuration error from the core
    #[error(transparent)]
    Core(#[from] contracts::CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    pub fn dispatcher_creation(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DispatcherCreation {
            id: id.into(),
            message: message.into(),
        }
    }
}
