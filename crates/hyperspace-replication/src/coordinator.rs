//! The coordinator seam.
//!
//! The coordinator service distributes configurations and orchestrates
//! checkpoints. The engine only reports back; configuration delivery
//! comes in through [`crate::ReplicationManager::reconfigure`].

/// Upcalls to the coordinator liaison.
pub trait CoordinatorLink: Send + Sync {
    /// Every key-state on this daemon reports an empty committable
    /// queue while the cluster is in read-only mode: the checkpoint is
    /// locally stable and backup may proceed.
    fn report_stable(&self, checkpoint: u64);
}
