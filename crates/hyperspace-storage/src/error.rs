//! Storage adapter errors.

use thiserror::Error;

/// Errors surfaced by a [`crate::DataLayer`] implementation.
///
/// A failure during persistence is not recoverable per-operation: the
/// replication engine wedges the affected key-state until the next
/// reconfiguration rather than risk divergence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("stored value failed to decode")]
    BadEncoding,

    /// The engine's view of history disagrees with what is on disk
    /// (an `overwrite`/`delete` old-value assertion failed).
    #[error("consistency check failed: stored value does not match expected old value")]
    Corruption,
}
