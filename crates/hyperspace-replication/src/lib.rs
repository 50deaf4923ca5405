//! # hyperspace-replication: The per-key replication engine
//!
//! This crate is the core of a Hyperspace daemon: the component that
//! orders concurrent client operations against a key, forwards versions
//! down value-dependent chains, persists committed versions through the
//! storage adapter, and garbage-collects acknowledged state.
//!
//! # Architecture
//!
//! ```text
//!  receive threads ──► per-key lock-free queues ──► key-state machine
//!                                                        │
//!                       ┌────────────────────────────────┼──────────┐
//!                       ▼                                ▼          ▼
//!                 chain routing                    storage adapter  acks
//!                 (Communication)                  (DataLayer)
//! ```
//!
//! - [`StateTable`] maps `(region, key)` to a [`KeyState`]; references
//!   pin entries and collection is atomic against new inserters.
//! - [`KeyState`] owns all in-flight operations for one key: three
//!   ordered queues (deferred, blocked, committable) plus the on-disk
//!   snapshot, driven by four lock-free input queues under a work-bit
//!   discipline (exactly one thread advances a key at a time).
//! - [`ReplicationManager`] is the process-wide component: chain
//!   routing, persistence, identifier management, reconfiguration,
//!   checkpoint quiescence, and the background [`Retransmitter`].
//!
//! The transport and the coordinator are external collaborators behind
//! the [`Communication`] and [`CoordinatorLink`] traits; the [`testing`]
//! module provides in-process implementations used by the integration
//! tests.

mod communication;
mod coordinator;
mod identifier_collector;
mod identifier_generator;
mod key_operation;
mod key_region;
mod key_state;
mod manager;
mod retransmitter;
mod state_table;
pub mod testing;

#[cfg(test)]
mod tests;

pub use communication::Communication;
pub use coordinator::CoordinatorLink;
pub use identifier_collector::IdentifierCollector;
pub use identifier_generator::IdentifierGenerator;
pub use key_operation::{ClientRef, KeyOperation, OpPath};
pub use key_region::KeyRegion;
pub use key_state::KeyState;
pub use manager::{KeyChange, ReplicationManager};
pub use retransmitter::Retransmitter;
pub use state_table::{StateRef, StateTable, TableState};
