//! # Queue
//!
//! Durable, per-processor dispatch queue.
//!
//! - `QueueRepository`: storage contract, `SqliteQueueRepository` implements it
//! - `QueueManager`: in-flight tracking and live counts on top of a repository
//! - `Clock`: time source for enqueue ordering and expiry

mod clock;
mod manager;
mod repository;
mod sqlite;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{QueueManager, EXPIRY_SWEEP_INTERVAL};
pub use repository::QueueRepository;
pub use sqlite::SqliteQueueRepository;
