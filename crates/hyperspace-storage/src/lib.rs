//! # hyperspace-storage: The storage adapter contract
//!
//! The replication engine persists committed versions through a narrow
//! contract, [`DataLayer`]. The real engine behind it is an external
//! log-structured store; this crate defines the contract plus
//! [`MemoryDataLayer`], an in-memory implementation used by tests and
//! development.
//!
//! Contract obligations:
//!
//! - `put`/`overwrite`/`delete` return only after the write is durable.
//! - Every write carries its region's [`SequenceId`]; the engine persists
//!   it so identifier generators can resume after a crash.
//! - `mark_acked` is a hint only: it tells the engine a sequence id
//!   carried no data change, so log compaction can reclaim the prefix.

mod error;
mod memory;

pub use error::StorageError;
pub use memory::MemoryDataLayer;

use bytes::Bytes;
use hyperspace_data::PackedTuple;
use hyperspace_types::{RegionId, SequenceId, Version};

/// The storage adapter used by the replication engine.
///
/// Implementations must be safe for concurrent use: the engine calls in
/// from many worker threads, one key at a time per key.
pub trait DataLayer: Send + Sync {
    /// Point lookup. `Ok(None)` means the key has no value.
    fn get(
        &self,
        region: RegionId,
        key: &Bytes,
    ) -> Result<Option<(PackedTuple, Version)>, StorageError>;

    /// Stores `value` at `version`, replacing any existing value.
    fn put(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        value: &PackedTuple,
        version: Version,
    ) -> Result<(), StorageError>;

    /// Stores `new_value` at `version`, asserting that the current value
    /// is `old_value` (a consistency check on the chain's view of
    /// history).
    fn overwrite(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        old_value: &PackedTuple,
        new_value: &PackedTuple,
        version: Version,
    ) -> Result<(), StorageError>;

    /// Removes the key, asserting that the current value is `old_value`.
    fn delete(
        &self,
        region: RegionId,
        seq: SequenceId,
        key: &Bytes,
        old_value: &PackedTuple,
    ) -> Result<(), StorageError>;

    /// Records that `seq` carried no data change for `region`.
    fn mark_acked(&self, region: RegionId, seq: SequenceId);

    /// The highest sequence id durably recorded for `region`, used to
    /// reseed the identifier generator on startup and reconfiguration.
    fn resume_sequence(&self, region: RegionId) -> Option<SequenceId>;
}
