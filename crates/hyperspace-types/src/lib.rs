//! # hyperspace-types: Core types for Hyperspace
//!
//! This crate contains the shared identifier and status types used across
//! the Hyperspace system:
//! - Cluster identity ([`ServerId`], [`VirtualServerId`])
//! - Space topology ([`SpaceId`], [`SubspaceId`], [`RegionId`])
//! - Per-key versioning ([`Version`])
//! - Per-region storage ordering ([`SequenceId`])
//! - Configuration epochs ([`ConfigEpoch`])
//! - Client-visible status codes ([`NetworkReturnCode`])
//!
//! All identifiers are cheap 8-byte `Copy` newtypes. The coordinator
//! assigns identifiers starting at 1; the value 0 is reserved as the
//! "none" sentinel so identifiers can travel over the wire without an
//! option wrapper.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Cluster identity
// ============================================================================

/// Unique identifier for a physical daemon process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ServerId(u64);

impl ServerId {
    /// The "no server" sentinel.
    pub const NONE: ServerId = ServerId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ServerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ServerId> for u64 {
    fn from(id: ServerId) -> Self {
        id.0
    }
}

/// Unique identifier for one daemon's role on one replica chain.
///
/// A daemon participates in many chains at once; each participation has
/// its own virtual server identity. The configuration maps a virtual
/// server back to `(server, region, chain position)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct VirtualServerId(u64);

impl VirtualServerId {
    /// The "no virtual server" sentinel.
    pub const NONE: VirtualServerId = VirtualServerId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for VirtualServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VirtualServerId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<VirtualServerId> for u64 {
    fn from(id: VirtualServerId) -> Self {
        id.0
    }
}

// ============================================================================
// Space topology
// ============================================================================

/// Unique identifier for a space (a user-visible table with a schema).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SpaceId(u64);

impl SpaceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SpaceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SpaceId> for u64 {
    fn from(id: SpaceId) -> Self {
        id.0
    }
}

/// Unique identifier for one hyperspace of a space.
///
/// The first subspace of every space is the key subspace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SubspaceId(u64);

impl SubspaceId {
    /// The "no subspace" sentinel, used where a subspace has no
    /// predecessor or successor.
    pub const NONE: SubspaceId = SubspaceId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for SubspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubspaceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SubspaceId> for u64 {
    fn from(id: SubspaceId) -> Self {
        id.0
    }
}

/// Unique identifier for a region: one rectangle of one subspace, owned
/// by one replica chain.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RegionId(u64);

impl RegionId {
    /// The "no region" sentinel, used e.g. for `next_region` at the last
    /// subspace of a chain.
    pub const NONE: RegionId = RegionId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RegionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<RegionId> for u64 {
    fn from(id: RegionId) -> Self {
        id.0
    }
}

// ============================================================================
// Versioning
// ============================================================================

/// The logical version of a key.
///
/// Versions are dense per key: the first write produces version 1 and
/// each subsequent write increments by one. Version 0 means "no value".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(u64);

impl Version {
    /// Version 0: the key has never had a value.
    pub const ZERO: Version = Version(0);

    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The next version in sequence.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(v: Version) -> Self {
        v.0
    }
}

/// Per-region monotone identifier used as the storage engine's ordering
/// key. Generated by the identifier generator, reclaimed by the
/// identifier collector once the operation that consumed it commits or
/// aborts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SequenceId(u64);

impl SequenceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SequenceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SequenceId> for u64 {
    fn from(id: SequenceId) -> Self {
        id.0
    }
}

// ============================================================================
// Configuration epochs
// ============================================================================

/// The version of the cluster configuration distributed by the
/// coordinator. Every chain message is stamped with the epoch it was
/// sent under; messages from other epochs are answered with
/// CONFIGMISMATCH and re-driven by the retransmitter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ConfigEpoch(u64);

impl ConfigEpoch {
    /// Epoch 0: before any configuration has been adopted.
    pub const ZERO: ConfigEpoch = ConfigEpoch(0);

    pub const fn new(e: u64) -> Self {
        Self(e)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> ConfigEpoch {
        ConfigEpoch(self.0 + 1)
    }
}

impl Display for ConfigEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConfigEpoch {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ConfigEpoch> for u64 {
    fn from(e: ConfigEpoch) -> Self {
        e.0
    }
}

// ============================================================================
// Status codes
// ============================================================================

/// Client-visible status codes carried in RESP_GET / RESP_ATOMIC.
///
/// The numeric values are part of the wire protocol and occupy a
/// dedicated range so they cannot be confused with message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum NetworkReturnCode {
    /// The operation completed.
    Success = 8320,
    /// The key does not exist (GET miss, or delete of a missing key).
    NotFound = 8321,
    /// The daemon encountered an internal error; retry elsewhere.
    ServerError = 8324,
    /// A compare-and-swap predicate failed.
    CmpFail = 8325,
    /// The cluster is quiesced for a checkpoint; writes are refused.
    ReadOnly = 8327,
    /// A numeric functional update would not be representable as int64.
    Overflow = 8328,
    /// The caller is not permitted to perform the operation.
    Unauthorized = 8329,
}

impl NetworkReturnCode {
    /// The wire representation.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Decodes a wire value, if it names a known status.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            8320 => Some(NetworkReturnCode::Success),
            8321 => Some(NetworkReturnCode::NotFound),
            8324 => Some(NetworkReturnCode::ServerError),
            8325 => Some(NetworkReturnCode::CmpFail),
            8327 => Some(NetworkReturnCode::ReadOnly),
            8328 => Some(NetworkReturnCode::Overflow),
            8329 => Some(NetworkReturnCode::Unauthorized),
            _ => None,
        }
    }
}

impl Display for NetworkReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkReturnCode::Success => "SUCCESS",
            NetworkReturnCode::NotFound => "NOTFOUND",
            NetworkReturnCode::ServerError => "SERVERERROR",
            NetworkReturnCode::CmpFail => "CMPFAIL",
            NetworkReturnCode::ReadOnly => "READONLY",
            NetworkReturnCode::Overflow => "OVERFLOW",
            NetworkReturnCode::Unauthorized => "UNAUTHORIZED",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn version_next_is_dense() {
        let v = Version::ZERO;
        assert!(v.is_zero());
        assert_eq!(v.next(), Version::new(1));
        assert_eq!(v.next().next(), Version::new(2));
    }

    #[test]
    fn sentinels_are_zero() {
        assert!(ServerId::NONE.is_none());
        assert!(VirtualServerId::NONE.is_none());
        assert!(RegionId::NONE.is_none());
        assert!(SubspaceId::NONE.is_none());
        assert!(!RegionId::new(1).is_none());
    }

    #[test_case(NetworkReturnCode::Success, 8320)]
    #[test_case(NetworkReturnCode::NotFound, 8321)]
    #[test_case(NetworkReturnCode::ServerError, 8324)]
    #[test_case(NetworkReturnCode::CmpFail, 8325)]
    #[test_case(NetworkReturnCode::ReadOnly, 8327)]
    #[test_case(NetworkReturnCode::Overflow, 8328)]
    #[test_case(NetworkReturnCode::Unauthorized, 8329)]
    fn returncode_round_trips(rc: NetworkReturnCode, wire: u16) {
        assert_eq!(rc.as_u16(), wire);
        assert_eq!(NetworkReturnCode::from_u16(wire), Some(rc));
    }

    #[test]
    fn returncode_rejects_unknown() {
        assert_eq!(NetworkReturnCode::from_u16(0), None);
        assert_eq!(NetworkReturnCode::from_u16(8326), None);
    }

    #[test]
    fn ids_serialize_transparently() {
        let ri = RegionId::new(7);
        let json = serde_json::to_string(&ri).unwrap();
        assert_eq!(json, "7");
        let back: RegionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ri);
    }
}
