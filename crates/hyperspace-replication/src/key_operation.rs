//! One logical version of one key.

use bytes::Bytes;
use hyperspace_data::PackedTuple;
use hyperspace_types::{ConfigEpoch, RegionId, SequenceId, ServerId, Version, VirtualServerId};

/// How the operation's position in the value-dependent chain was
/// established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpPath {
    /// Not yet hashed; the four region ids are meaningless.
    Unknown,
    /// Region ids were derived locally by hashing old and new values.
    Continuous,
    /// Region ids arrived in a CHAIN_SUBSPACE message and are taken on
    /// faith; this side of a subspace transfer has no prior version to
    /// hash against.
    Discontinuous,
}

/// The client awaiting the outcome of a version (point leader only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRef {
    pub client: ServerId,
    pub nonce: u64,
}

/// One logical version moving through `DEFERRED → BLOCKED → COMMITTABLE
/// → ACKED → PERSISTED → FORGOTTEN`.
///
/// The operation exclusively owns its packed value (`Bytes`-backed, so
/// it stays self-contained across thread handoff); the key-state
/// exclusively owns the operation.
#[derive(Debug, Clone)]
pub struct KeyOperation {
    pub prev_version: Version,
    pub this_version: Version,
    /// First version of the key: no predecessor exists anywhere.
    pub fresh: bool,
    /// `false` encodes a delete.
    pub has_value: bool,
    pub value: PackedTuple,

    /// The region whose generator issued `seq_id` (the point leader's
    /// region), and the id itself. Zero until the point leader assigns.
    pub reg_id: RegionId,
    pub seq_id: SequenceId,

    /// Where to send the response once this version commits.
    pub client: Option<ClientRef>,

    pub acked: bool,

    /// The upstream neighbor, as `(epoch, id)`, never a pointer;
    /// validity is re-derived from the current configuration.
    pub recv_epoch: ConfigEpoch,
    pub recv: VirtualServerId,
    /// The downstream neighbor this op was issued to, and under which
    /// epoch. Cleared by the retransmitter on reconfiguration.
    pub sent_epoch: ConfigEpoch,
    pub sent: VirtualServerId,

    pub path: OpPath,
    pub prev_region: RegionId,
    pub this_old_region: RegionId,
    pub this_new_region: RegionId,
    pub next_region: RegionId,

    /// Per-attribute hashes of the old and new values, key first.
    pub old_hashes: Vec<u64>,
    pub new_hashes: Vec<u64>,
}

impl KeyOperation {
    /// An operation whose chain position will be derived by hashing.
    pub fn continuous(
        prev_version: Version,
        this_version: Version,
        fresh: bool,
        has_value: bool,
        value: PackedTuple,
    ) -> Self {
        Self {
            prev_version,
            this_version,
            fresh,
            has_value,
            value,
            reg_id: RegionId::NONE,
            seq_id: SequenceId::new(0),
            client: None,
            acked: false,
            recv_epoch: ConfigEpoch::ZERO,
            recv: VirtualServerId::NONE,
            sent_epoch: ConfigEpoch::ZERO,
            sent: VirtualServerId::NONE,
            path: OpPath::Unknown,
            prev_region: RegionId::NONE,
            this_old_region: RegionId::NONE,
            this_new_region: RegionId::NONE,
            next_region: RegionId::NONE,
            old_hashes: Vec::new(),
            new_hashes: Vec::new(),
        }
    }

    /// An operation that crossed a subspace transfer: the four region
    /// ids come from the message, never from re-hashing.
    pub fn discontinuous(
        prev_version: Version,
        this_version: Version,
        value: PackedTuple,
        hashes: Vec<u64>,
        prev_region: RegionId,
        this_old_region: RegionId,
        this_new_region: RegionId,
        next_region: RegionId,
    ) -> Self {
        let mut op = Self::continuous(prev_version, this_version, false, true, value);
        op.path = OpPath::Discontinuous;
        op.prev_region = prev_region;
        op.this_old_region = this_old_region;
        op.this_new_region = this_new_region;
        op.next_region = next_region;
        op.old_hashes = hashes.clone();
        op.new_hashes = hashes;
        op
    }

    /// Whether this op's regions were fixed by a CHAIN_SUBSPACE message.
    pub fn is_discontinuous(&self) -> bool {
        self.path == OpPath::Discontinuous
    }

    pub fn set_recv(&mut self, epoch: ConfigEpoch, from: VirtualServerId) {
        self.recv_epoch = epoch;
        self.recv = from;
    }

    pub fn set_sent(&mut self, epoch: ConfigEpoch, to: VirtualServerId) {
        self.sent_epoch = epoch;
        self.sent = to;
    }

    pub fn clear_sent(&mut self) {
        self.sent_epoch = ConfigEpoch::ZERO;
        self.sent = VirtualServerId::NONE;
    }

    /// A compact rendition for debug dumps.
    pub fn describe(&self, key: &Bytes) -> String {
        format!(
            "v{}<-v{} key={:?} fresh={} has_value={} acked={} regions=({},{},{},{}) sent={}@{}",
            self.this_version,
            self.prev_version,
            key,
            self.fresh,
            self.has_value,
            self.acked,
            self.prev_region,
            self.this_old_region,
            self.this_new_region,
            self.next_region,
            self.sent,
            self.sent_epoch,
        )
    }
}
