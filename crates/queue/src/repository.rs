//! QueueRepository trait - durable dispatch queue

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use contracts::{CoreError, Dispatch};

/// Durable store of dispatches and their per-processor membership
///
/// A dispatch blob is stored once; each processor that still has to handle it
/// owns one membership row. Mutations are transactional.
pub trait QueueRepository: Send {
    /// Number of stored dispatches (not memberships)
    fn size(&mut self) -> Result<usize, CoreError>;

    /// Persist `dispatches` for every processor in `processors`
    ///
    /// Evicts the oldest stored dispatches first if the batch would exceed the
    /// size cap. Re-storing a pair already present is a no-op.
    fn store_dispatches(
        &mut self,
        dispatches: &[Dispatch],
        processors: &BTreeSet<String>,
    ) -> Result<(), CoreError>;

    /// Up to `count` (negative = all) non-expired dispatches for `processor`,
    /// oldest enqueued first, skipping ids in `excluding`
    fn get_queued_dispatches(
        &mut self,
        count: i64,
        excluding: &HashSet<String>,
        processor: &str,
    ) -> Result<Vec<Dispatch>, CoreError>;

    /// Remove `processor`'s membership for each of `dispatch_ids`
    fn delete_dispatches(&mut self, dispatch_ids: &[String], processor: &str)
        -> Result<(), CoreError>;

    fn delete_dispatch(&mut self, dispatch_id: &str, processor: &str) -> Result<(), CoreError> {
        self.delete_dispatches(&[dispatch_id.to_string()], processor)
    }

    /// Remove every membership of `processor`
    fn delete_all_dispatches(&mut self, processor: &str) -> Result<(), CoreError>;

    /// Remove memberships of every processor not in `processors`
    ///
    /// The first call also migrates a legacy single-table store, best-effort.
    fn delete_queues(&mut self, processors: &BTreeSet<String>) -> Result<(), CoreError>;

    /// Non-expired membership count per processor
    fn queue_sizes(&mut self) -> Result<BTreeMap<String, usize>, CoreError>;

    /// Ids still queued (non-expired) for `processor`
    fn queued_ids(&mut self, processor: &str) -> Result<HashSet<String>, CoreError>;

    /// Apply a new size cap (negative = unbounded), evicting overflow now
    fn resize(&mut self, max_queue_size: i64) -> Result<(), CoreError>;

    /// Apply a new expiration window
    ///
    /// Entries older than the narrower of the old and new windows are deleted.
    fn set_expiration(&mut self, expiration: Duration) -> Result<(), CoreError>;

    /// Delete expired entries, returning how many dispatches were removed
    fn delete_expired(&mut self) -> Result<usize, CoreError>;
}
