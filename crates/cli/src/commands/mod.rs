//! Command implementations.

mod info;
mod run;
mod validate;

pub use info::run_info;
pub use run::run_dispatch;
pub use validate::run_validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::{CoreSettings, SdkSettings};
use queue::{SqliteQueueRepository, SystemClock};

use crate::error::CliError;

/// Load and validate the settings file at `path`
pub(crate) fn load_settings(path: &Path) -> Result<SdkSettings> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()).into());
    }
    config_loader::ConfigLoader::load_from_path(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// File-backed queue when `database_path` is set, in-memory otherwise
pub(crate) fn open_repository(core: &CoreSettings) -> Result<SqliteQueueRepository> {
    let clock = Arc::new(SystemClock);
    let repository = match &core.database_path {
        Some(path) => SqliteQueueRepository::open(path, clock, core)
            .with_context(|| format!("Failed to open queue database {}", path.display()))?,
        None => SqliteQueueRepository::open_in_memory(clock, core)
            .context("Failed to open in-memory queue")?,
    };
    Ok(repository)
}
