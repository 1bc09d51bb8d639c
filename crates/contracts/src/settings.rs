//! SDK settings contracts shared across crates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::{BarrierScope, DataObject, MappingOperation, TransformationScope};

/// Default number of stored dispatches
pub const DEFAULT_MAX_QUEUE_SIZE: i64 = 100;
/// Default expiration window (one day)
pub const DEFAULT_EXPIRATION_SECS: u64 = 86_400;
/// Default in-flight ceiling per dispatcher
pub const DEFAULT_MAX_IN_FLIGHT: usize = 50;

/// Top-level settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkSettings {
    #[serde(default)]
    pub core: CoreSettings,

    /// Barrier id -> settings
    #[serde(default)]
    pub barriers: BTreeMap<String, BarrierSettings>,

    /// Ordered transformation list
    #[serde(default)]
    pub transformations: Vec<TransformationSettings>,

    /// Dispatcher id -> mapping list
    #[serde(default)]
    pub mappings: BTreeMap<String, Vec<MappingOperation>>,

    /// Built-in dispatchers to register
    #[serde(default)]
    pub dispatchers: Vec<DispatcherConfig>,
}

/// Queue and loop limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CoreSettings {
    /// Maximum stored dispatches; negative means unbounded
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: i64,

    /// Seconds a queued dispatch stays deliverable
    #[serde(default = "default_expiration_secs")]
    #[validate(range(min = 1))]
    pub expiration_secs: u64,

    /// Maximum unacknowledged dispatches per dispatcher
    #[serde(default = "default_max_in_flight")]
    #[validate(range(min = 1))]
    pub max_in_flight: usize,

    /// SQLite file; in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl CoreSettings {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            expiration_secs: DEFAULT_EXPIRATION_SECS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            database_path: None,
        }
    }
}

fn default_max_queue_size() -> i64 {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_expiration_secs() -> u64 {
    DEFAULT_EXPIRATION_SECS
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

/// Per-barrier settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarrierSettings {
    /// Overrides the barrier's default scope when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<BarrierScope>>,

    /// Barrier-specific options (e.g. `batch_size`)
    #[serde(default)]
    pub configuration: DataObject,
}

/// One configured transformation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSettings {
    pub id: String,

    /// Transformer that performs it
    pub transformer_id: String,

    pub scopes: Vec<TransformationScope>,

    #[serde(default)]
    pub configuration: DataObject,
}

/// Kind of built-in dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherKind {
    Log,
    File,
}

/// Built-in dispatcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DispatcherConfig {
    #[validate(length(min = 1))]
    pub id: String,

    pub kind: DispatcherKind,

    /// Maximum dispatches handed over per call
    #[serde(default = "default_dispatch_limit")]
    #[validate(range(min = 1))]
    pub dispatch_limit: usize,

    /// Kind-specific parameters (e.g. `path` for file)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_dispatch_limit() -> usize {
    1
}
