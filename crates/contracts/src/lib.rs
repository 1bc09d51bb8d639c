//! # Contracts
//!
//! Frozen interface contracts shared by every dispatch crate: the `Dispatch`
//! data model, scopes, settings and the traits of pluggable modules.
//! Business crates depend on this crate only, never the reverse.
//!
//! ## Time Model
//! - Timestamps are epoch milliseconds (`i64`)
//! - Queue expiry is measured from enqueue time, not creation time

mod barrier;
mod consent;
mod data;
mod dispatch;
mod dispatcher;
mod error;
mod mapping;
mod metrics;
mod rules;
mod scope;
mod settings;
mod transformer;

pub use barrier::*;
pub use consent::*;
pub use data::*;
pub use dispatch::*;
pub use dispatcher::*;
pub use error::*;
pub use mapping::*;
pub use metrics::QueueMetrics;
pub use rules::*;
pub use scope::*;
pub use settings::*;
pub use transformer::Transformer;

pub use async_trait::async_trait;
pub use pubsub::Observable;
