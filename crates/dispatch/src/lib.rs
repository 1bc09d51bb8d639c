//! # Dispatch
//!
//! Delivery side of the pipeline.
//!
//! - `DispatchManager`: accepts tracked dispatches, runs one pull loop per dispatcher
//! - `BarrierManager` / `BarrierCoordinator`: per-dispatcher admission gate
//! - `TransformerCoordinator`: scoped, sequential transformations
//! - `MappingsEngine`: per-dispatcher payload remapping
//! - `DispatchRuntime`: all of the above wired from live settings
//!
//! A dispatcher never reports failure: whatever it does not acknowledge
//! stays queued and is delivered again by a later loop.

pub mod barriers;
pub mod dispatchers;
pub mod error;
pub mod handle;
pub mod manager;
pub mod mappings;
pub mod metrics;
pub mod registry;
pub mod runtime;
pub mod settings;
pub mod transform;

pub use barriers::{BarrierCoordinator, BarrierManager, BatchingBarrier, ConnectivityBarrier};
pub use dispatchers::{create_dispatcher, FileDispatcher, FileDispatcherConfig, LogDispatcher};
pub use error::DispatchError;
pub use handle::DispatcherHandle;
pub use manager::{DispatchManager, DispatchManagerBuilder};
pub use mappings::MappingsEngine;
pub use metrics::{DispatcherMetrics, MetricsSnapshot};
pub use registry::{Module, ModuleSet};
pub use runtime::{DispatchRuntime, RuntimeOptions};
pub use settings::SettingsStreams;
pub use transform::TransformerCoordinator;
