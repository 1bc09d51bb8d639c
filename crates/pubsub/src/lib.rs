//! # PubSub
//!
//! Minimal hot-stream primitives used by the dispatch core.
//!
//! Provides:
//! - `StateSubject`: replay-latest value holder (settings, module sets, gates)
//! - `Subscription`: explicit handle to a spawned observer task
//! - `DisposeFlag`: guard for callbacks that may arrive after teardown
//! - Operators: `map_distinct`, `changed_any`
//!
//! Everything is built on `tokio::sync::watch`, so any `Observable` always
//! holds the latest value and late subscribers see it immediately.

mod operators;
mod subject;
mod subscription;

pub use operators::{changed_any, map_distinct};
pub use subject::StateSubject;
pub use subscription::{DisposeFlag, Subscription, SubscriptionSet};

/// A replay-latest stream of values
pub type Observable<T> = tokio::sync::watch::Receiver<T>;
