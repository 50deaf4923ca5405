//! # Hyperspace
//!
//! A distributed, multi-attribute searchable key-value store. Each
//! *space* is a typed table; objects are positioned in one or more
//! *subspaces* by hashing their attributes, and every *region* of a
//! subspace is replicated by a value-dependent chain that gives
//! linearizable per-key semantics even as updates move keys between
//! regions.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           daemon                              │
//! │  ┌──────────┐   ┌─────────────────┐   ┌───────────────────┐   │
//! │  │   wire   │ → │   replication   │ → │  storage adapter  │   │
//! │  │ (frames) │   │ (per-key chains)│   │   (DataLayer)     │   │
//! │  └──────────┘   └─────────────────┘   └───────────────────┘   │
//! │        ▲                 ▲                                    │
//! │        │                 │ configuration epochs               │
//! │     clients          coordinator                              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! This crate is the umbrella: it re-exports the public surface of the
//! member crates and owns the daemon's TOML settings.
//!
//! # Crates
//!
//! - `hyperspace-types`: identifiers, versions, status codes
//! - `hyperspace-data`: schemas, typed values, ordered encodings
//! - `hyperspace-config`: the coordinator-distributed configuration
//! - `hyperspace-wire`: the binary wire protocol
//! - `hyperspace-storage`: the storage adapter contract
//! - `hyperspace-replication`: the per-key replication engine

mod settings;

pub use settings::{DaemonSettings, LoggingSettings, ReplicationSettings, StorageSettings};

pub use hyperspace_config::{
    ConfigError, Configuration, RegionConfig, SpaceConfig, SubspaceConfig,
};
pub use hyperspace_data::{
    AttrType, Attribute, AttributeCheck, DataError, FuncKind, Funcall, PackedTuple, Predicate,
    PrimType, Schema, Value,
};
pub use hyperspace_replication::{
    Communication, CoordinatorLink, KeyChange, ReplicationManager, Retransmitter,
};
pub use hyperspace_storage::{DataLayer, MemoryDataLayer, StorageError};
pub use hyperspace_types::{
    ConfigEpoch, NetworkReturnCode, RegionId, SequenceId, ServerId, SpaceId, SubspaceId,
    Version, VirtualServerId,
};
pub use hyperspace_wire::{Envelope, Message, MessageType, WireError};
