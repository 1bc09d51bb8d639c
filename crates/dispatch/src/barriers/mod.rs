//! Admission control
//!
//! `BarrierManager` resolves which barriers apply where; `BarrierCoordinator`
//! reduces them into one gate per dispatcher.

mod batching;
mod connectivity;
mod coordinator;
mod manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use batching::BatchingBarrier;
pub use connectivity::ConnectivityBarrier;
pub use coordinator::BarrierCoordinator;
pub use manager::BarrierManager;
