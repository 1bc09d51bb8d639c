//! Built-in dispatchers

mod file;
mod log;

use std::sync::Arc;

use contracts::{DispatcherConfig, DispatcherKind, Dispatcher};

use crate::error::DispatchError;

pub use file::{FileDispatcher, FileDispatcherConfig};
pub use log::LogDispatcher;

/// Build a dispatcher from its settings entry
pub fn create_dispatcher(config: &DispatcherConfig) -> Result<Arc<dyn Dispatcher>, DispatchError> {
    let dispatcher: Arc<dyn Dispatcher> = match config.kind {
        DispatcherKind::Log => Arc::new(LogDispatcher::with_limit(&config.id, config.dispatch_limit)),
        DispatcherKind::File => {
            let file_config = FileDispatcherConfig::from_params(&config.id, &config.params)?;
            Arc::new(FileDispatcher::new(&config.id, config.dispatch_limit, file_config)?)
        }
    };
    Ok(dispatcher)
}
