//! The process-wide replication manager.
//!
//! One instance per daemon. Network receive threads call the public
//! entry points (`client_atomic`, `client_get`, `chain_op`,
//! `chain_subspace`, `chain_ack`); each resolves the target virtual
//! server against the current configuration, pins the key-state, and
//! enqueues a stub for the key's state machine. The manager also owns
//! chain routing, the identifier generator/collector pair, checkpoint
//! quiescence, and reconfiguration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use hyperspace_config::Configuration;
use hyperspace_data::{AttributeCheck, Funcall, PackedTuple, Schema};
use hyperspace_storage::DataLayer;
use hyperspace_types::{
    ConfigEpoch, NetworkReturnCode, RegionId, SequenceId, ServerId, Version, VirtualServerId,
};
use hyperspace_wire::Message;

use crate::communication::Communication;
use crate::coordinator::CoordinatorLink;
use crate::identifier_collector::IdentifierCollector;
use crate::identifier_generator::IdentifierGenerator;
use crate::key_operation::KeyOperation;
use crate::key_region::KeyRegion;
use crate::key_state::{
    KeyState, StubChainAck, StubChainOp, StubChainSubspace, StubClientAtomic,
};
use crate::state_table::{StateRef, StateTable};

/// A client-requested change to one key: the whole-operation predicates
/// plus the attribute checks and functional updates of a REQ_ATOMIC.
#[derive(Debug, Clone, Default)]
pub struct KeyChange {
    pub erase: bool,
    pub fail_if_not_found: bool,
    pub fail_if_found: bool,
    pub checks: Vec<AttributeCheck>,
    pub funcs: Vec<Funcall>,
}

/// Outcome of routing one downstream emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    /// Issued to a downstream neighbor (or already issued this epoch).
    Sent,
    /// This virtual server is the end of the value-dependent chain; the
    /// operation is ready to acknowledge upstream.
    NoDownstream,
    /// The send was dropped; the retransmitter will retry.
    Dropped,
}

/// The replication engine of one daemon.
pub struct ReplicationManager {
    us: ServerId,
    data: Arc<dyn DataLayer>,
    comm: Arc<dyn Communication>,
    coordinator: Arc<dyn CoordinatorLink>,

    config: RwLock<Arc<Configuration>>,
    key_states: StateTable<KeyState>,
    idgen: IdentifierGenerator,
    idcol: IdentifierCollector,

    read_only: AtomicBool,
    checkpoint: AtomicU64,
    need_check: AtomicBool,
    corruption: AtomicU64,
}

/// A daemon seeing this many impossible states is not going to get
/// better on its own; it exits rather than risk silent divergence.
const FATAL_CORRUPTION_THRESHOLD: u64 = 64;

impl ReplicationManager {
    pub fn new(
        us: ServerId,
        data: Arc<dyn DataLayer>,
        comm: Arc<dyn Communication>,
        coordinator: Arc<dyn CoordinatorLink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            us,
            data,
            comm,
            coordinator,
            config: RwLock::new(Arc::new(Configuration::empty())),
            key_states: StateTable::new(),
            idgen: IdentifierGenerator::new(),
            idcol: IdentifierCollector::new(),
            read_only: AtomicBool::new(false),
            checkpoint: AtomicU64::new(0),
            need_check: AtomicBool::new(false),
            corruption: AtomicU64::new(0),
        })
    }

    pub fn server(&self) -> ServerId {
        self.us
    }

    pub fn config(&self) -> Arc<Configuration> {
        Arc::clone(&self.config.read().expect("config lock poisoned"))
    }

    pub fn epoch(&self) -> ConfigEpoch {
        self.config().epoch()
    }

    pub(crate) fn data(&self) -> &dyn DataLayer {
        self.data.as_ref()
    }

    pub fn read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Number of key-states currently resident, for tests and dumps.
    pub fn resident_key_states(&self) -> usize {
        self.key_states.len()
    }

    // ========================================================================
    // Reconfiguration
    // ========================================================================

    /// Adopts a new configuration snapshot: swaps the epoch, reseeds the
    /// identifier generators and collectors for the regions this daemon
    /// now serves, clears deferred queues, and unwedges key-states. The
    /// caller quiesces receive threads around this call; the
    /// retransmitter re-emits stale committables afterwards.
    pub fn reconfigure(&self, new_config: Configuration) {
        let new_config = Arc::new(new_config);
        let epoch = new_config.epoch();
        let regions = new_config.regions_on(self.us);

        *self.config.write().expect("config lock poisoned") = Arc::clone(&new_config);

        self.idgen.adopt(&regions, |ri| {
            self.data
                .resume_sequence(ri)
                .map_or(1, |seq| seq.as_u64() + 1)
        });
        self.idcol.adopt(&regions);

        for key in self.key_states.snapshot_keys() {
            if let Some(ks) = self.key_states.get(&key) {
                ks.reconfigure(self);
            }
        }

        tracing::info!(
            server = %self.us,
            epoch = %epoch,
            regions = regions.len(),
            "adopted configuration"
        );
    }

    // ========================================================================
    // Client entry points
    // ========================================================================

    /// REQ_ATOMIC: a client-ordered read-modify-write or delete.
    /// Must arrive at the point leader of the key's region.
    pub fn client_atomic(
        &self,
        from: ServerId,
        to: VirtualServerId,
        nonce: u64,
        key: Bytes,
        change: KeyChange,
    ) {
        let config = self.config();

        if config.server_of(to) != Some(self.us) {
            tracing::warn!(vsi = %to, "client atomic addressed to a virtual server we don't host");
            self.respond_to_client(to, from, nonce, NetworkReturnCode::ServerError);
            return;
        }

        if !config.is_point_leader(to) {
            tracing::warn!(vsi = %to, "client atomic addressed to a non-point-leader");
            self.respond_to_client(to, from, nonce, NetworkReturnCode::ServerError);
            return;
        }

        let Some(region) = config.region_of(to) else {
            self.respond_to_client(to, from, nonce, NetworkReturnCode::ServerError);
            return;
        };
        let Some(schema) = config.schema_of(to) else {
            self.respond_to_client(to, from, nonce, NetworkReturnCode::ServerError);
            return;
        };

        let Some(ks) = self.get_or_create_key_state(region, &key) else {
            self.respond_to_client(to, from, nonce, NetworkReturnCode::ServerError);
            return;
        };

        ks.enqueue_client_atomic(
            self,
            to,
            schema,
            StubClientAtomic {
                from,
                nonce,
                erase: change.erase,
                fail_if_not_found: change.fail_if_not_found,
                fail_if_found: change.fail_if_found,
                checks: change.checks,
                funcs: change.funcs,
            },
        );
    }

    /// REQ_GET: a point read, served by the tail of the key's region
    /// from durably persisted state. Reads never bypass the chain tail.
    pub fn client_get(&self, from: ServerId, to: VirtualServerId, nonce: u64, key: &Bytes) {
        let config = self.config();

        if config.server_of(to) != Some(self.us) {
            tracing::warn!(vsi = %to, "get addressed to a virtual server we don't host");
            self.respond_get(to, from, nonce, NetworkReturnCode::ServerError, None);
            return;
        }

        let Some(region) = config.region_of(to) else {
            self.respond_get(to, from, nonce, NetworkReturnCode::ServerError, None);
            return;
        };

        if config.tail_of_region(region) != to {
            tracing::warn!(vsi = %to, region = %region, "get addressed to a non-tail replica");
            self.respond_get(to, from, nonce, NetworkReturnCode::ServerError, None);
            return;
        }

        match self.data.get(region, key) {
            Ok(Some((value, _version))) => {
                self.respond_get(to, from, nonce, NetworkReturnCode::Success, Some(value));
            }
            Ok(None) => {
                self.respond_get(to, from, nonce, NetworkReturnCode::NotFound, None);
            }
            Err(err) => {
                tracing::error!(region = %region, error = %err, "storage read failed on get");
                self.respond_get(to, from, nonce, NetworkReturnCode::ServerError, None);
            }
        }
    }

    /// REQ_GET_PARTIAL: like [`Self::client_get`], but returns only the
    /// requested attributes (by schema index).
    pub fn client_get_partial(
        &self,
        from: ServerId,
        to: VirtualServerId,
        nonce: u64,
        key: &Bytes,
        attrs: &[u16],
    ) {
        let config = self.config();

        let valid = config.server_of(to) == Some(self.us)
            && config
                .region_of(to)
                .is_some_and(|region| config.tail_of_region(region) == to);

        if !valid {
            tracing::warn!(vsi = %to, "partial get addressed to a non-tail replica");
            self.respond_get_partial(to, from, nonce, NetworkReturnCode::ServerError, Vec::new());
            return;
        }

        let region = config.region_of(to).expect("validated above");
        let Some(schema) = config.schema_of(to) else {
            self.respond_get_partial(to, from, nonce, NetworkReturnCode::ServerError, Vec::new());
            return;
        };

        if attrs
            .iter()
            .any(|a| *a == 0 || *a >= schema.attrs_sz())
        {
            self.respond_get_partial(to, from, nonce, NetworkReturnCode::ServerError, Vec::new());
            return;
        }

        match self.data.get(region, key) {
            Ok(Some((value, _version))) => {
                let projected = attrs
                    .iter()
                    .filter_map(|a| value.attr(a - 1).map(|packed| (*a, packed.clone())))
                    .collect();
                self.respond_get_partial(to, from, nonce, NetworkReturnCode::Success, projected);
            }
            Ok(None) => {
                self.respond_get_partial(to, from, nonce, NetworkReturnCode::NotFound, Vec::new());
            }
            Err(err) => {
                tracing::error!(region = %region, error = %err, "storage read failed on partial get");
                self.respond_get_partial(to, from, nonce, NetworkReturnCode::ServerError, Vec::new());
            }
        }
    }

    // ========================================================================
    // Chain entry points
    // ========================================================================

    /// CHAIN_OP from an upstream neighbor.
    pub fn chain_op(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
        old_version: Version,
        new_version: Version,
        fresh: bool,
        has_value: bool,
        key: Bytes,
        value: PackedTuple,
    ) {
        let Some((region, schema)) = self.chain_target(from, to, epoch) else {
            return;
        };

        let Some(ks) = self.get_or_create_key_state(region, &key) else {
            return;
        };

        ks.enqueue_chain_op(
            self,
            to,
            &schema,
            StubChainOp {
                from,
                epoch,
                old_version,
                new_version,
                fresh,
                has_value,
                value,
            },
        );
    }

    /// CHAIN_SUBSPACE: a subspace transfer whose four region ids travel
    /// with the message.
    pub fn chain_subspace(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
        old_version: Version,
        new_version: Version,
        key: Bytes,
        value: PackedTuple,
        hashes: Vec<u64>,
        prev_region: RegionId,
        this_old_region: RegionId,
        this_new_region: RegionId,
        next_region: RegionId,
    ) {
        let Some((region, schema)) = self.chain_target(from, to, epoch) else {
            return;
        };

        let Some(ks) = self.get_or_create_key_state(region, &key) else {
            return;
        };

        ks.enqueue_chain_subspace(
            self,
            to,
            &schema,
            StubChainSubspace {
                from,
                epoch,
                old_version,
                new_version,
                value,
                hashes,
                prev_region,
                this_old_region,
                this_new_region,
                next_region,
            },
        );
    }

    /// CHAIN_ACK from our downstream neighbor.
    pub fn chain_ack(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
        version: Version,
        key: &Bytes,
    ) {
        let Some((region, schema)) = self.chain_target(from, to, epoch) else {
            return;
        };

        let key_region = KeyRegion::new(region, key.clone());
        let Some(ks) = self.key_states.get(&key_region) else {
            tracing::debug!(key = %key_region, version = %version, "ack for unknown key-state");
            return;
        };

        ks.enqueue_chain_ack(
            self,
            to,
            &schema,
            StubChainAck {
                from,
                epoch,
                version,
            },
        );
    }

    /// Validates a chain message's target and epoch. Answers stale
    /// epochs with CONFIGMISMATCH so the sender reconfigures and
    /// retransmits.
    fn chain_target(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
    ) -> Option<(RegionId, Schema)> {
        let config = self.config();

        if config.server_of(to) != Some(self.us) {
            tracing::warn!(vsi = %to, "chain message addressed to a virtual server we don't host");
            return None;
        }

        if epoch != config.epoch() {
            tracing::debug!(
                vsi = %to,
                msg_epoch = %epoch,
                our_epoch = %config.epoch(),
                "chain message from another configuration epoch"
            );
            self.comm
                .send(to, from, config.epoch(), Message::ConfigMismatch);
            return None;
        }

        let region = config.region_of(to)?;
        let schema = config.schema_of(to)?.clone();
        Some((region, schema))
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Enters read-only mode for checkpoint `seq`: client atomics are
    /// refused with READONLY while chain traffic keeps draining.
    pub fn begin_checkpoint(&self, seq: u64) {
        self.checkpoint.store(seq, Ordering::SeqCst);
        self.read_only.store(true, Ordering::SeqCst);
        tracing::info!(checkpoint = seq, "entering read-only mode");
        self.check_stable();
    }

    /// Leaves read-only mode; normal service resumes.
    pub fn end_checkpoint(&self, seq: u64) {
        self.read_only.store(false, Ordering::SeqCst);
        self.need_check.store(false, Ordering::SeqCst);
        tracing::info!(checkpoint = seq, "leaving read-only mode");
    }

    /// Reports stability to the coordinator once every key-state has an
    /// empty committable queue. Driven by the retransmitter and by
    /// [`Self::begin_checkpoint`].
    pub fn check_stable(&self) {
        if !self.read_only() {
            return;
        }

        self.need_check.store(false, Ordering::SeqCst);

        for key in self.key_states.snapshot_keys() {
            if let Some(ks) = self.key_states.get(&key) {
                if !ks.committable_is_empty() {
                    return;
                }
            }
        }

        let checkpoint = self.checkpoint.load(Ordering::SeqCst);
        tracing::info!(checkpoint, "all key-states stable");
        self.coordinator.report_stable(checkpoint);
    }

    pub(crate) fn note_committable_drained(&self) {
        if self.read_only() {
            self.need_check.store(true, Ordering::SeqCst);
        }
    }

    /// Whether a stability re-check is pending.
    pub(crate) fn takes_stability_check(&self) -> bool {
        self.need_check.swap(false, Ordering::SeqCst)
    }

    // ========================================================================
    // Retransmission support
    // ========================================================================

    /// One full repair pass: walk every key-state, re-emit committable
    /// operations whose send predates the current epoch, gather
    /// in-flight sequence ids, and close identifier gaps so committed
    /// versions stay dense. Garbage key-states are collected as a side
    /// effect of the walk dropping its references.
    pub fn retransmit_cycle(&self) {
        let config = self.config();
        let mut inflight: Vec<(RegionId, SequenceId)> = Vec::new();

        for key in self.key_states.snapshot_keys() {
            let Some(ks) = self.key_states.get(&key) else {
                continue;
            };

            let Some(us) = self.virtual_server_for(&config, ks.region()) else {
                continue;
            };

            let Some(schema) = config.schema_of_region(ks.region()).cloned() else {
                continue;
            };

            ks.resend_committable(self, us, &schema);
            ks.append_seq_ids(&mut inflight);
        }

        self.close_gaps(&config, &inflight);

        if self.takes_stability_check() || self.read_only() {
            self.check_stable();
        }
    }

    /// Collects identifier-space gaps: ids below the generator's next
    /// issue point that no in-flight operation holds were consumed by
    /// operations that failed or were dropped, and will never commit.
    fn close_gaps(&self, config: &Configuration, inflight: &[(RegionId, SequenceId)]) {
        for ri in config.regions_on(self.us) {
            let lower = self.idcol.lower_bound(ri);
            let peek = self.idgen.peek(ri);

            for id in lower..peek {
                let held = inflight
                    .iter()
                    .any(|(region, seq)| *region == ri && seq.as_u64() == id);

                if !held {
                    self.idcol.collect(ri, id);
                }
            }
        }
    }

    /// The virtual server this daemon runs for `region`, if any.
    fn virtual_server_for(
        &self,
        config: &Configuration,
        region: RegionId,
    ) -> Option<VirtualServerId> {
        config
            .virtual_servers_on(self.us)
            .into_iter()
            .find(|vsi| config.region_of(*vsi) == Some(region))
    }

    /// Logs every key-state's queues, for post-mortem use.
    pub fn debug_dump(&self) {
        tracing::info!(
            server = %self.us,
            epoch = %self.epoch(),
            key_states = self.key_states.len(),
            read_only = self.read_only(),
            "replication manager dump"
        );

        for key in self.key_states.snapshot_keys() {
            if let Some(ks) = self.key_states.get(&key) {
                ks.debug_dump();
            }
        }
    }

    // ========================================================================
    // Services for the key-state machine
    // ========================================================================

    /// Records an impossible state (a malformed message that passed
    /// framing, an operation in the wrong region). Each event is logged
    /// with enough context to reconstruct; a daemon accumulating them is
    /// diverging and exits.
    pub fn note_corruption(&self) {
        let seen = self.corruption.fetch_add(1, Ordering::SeqCst) + 1;

        if seen >= FATAL_CORRUPTION_THRESHOLD {
            tracing::error!(seen, "repeated corruption; aborting");
            std::process::abort();
        }
    }

    pub(crate) fn generate_seq_id(&self, region: RegionId) -> SequenceId {
        self.idgen.generate(region)
    }

    pub(crate) fn collect_seq_id(&self, region: RegionId, seq: SequenceId) {
        self.idcol.collect(region, seq.as_u64());
    }

    /// The storage engine may reclaim log prefixes below this.
    pub fn reclaimable_below(&self, region: RegionId) -> u64 {
        self.idcol.lower_bound(region)
    }

    pub(crate) fn respond_to_client(
        &self,
        us: VirtualServerId,
        client: ServerId,
        nonce: u64,
        status: NetworkReturnCode,
    ) {
        let sent = self
            .comm
            .send_client(us, client, Message::RespAtomic { nonce, status });

        if !sent {
            tracing::warn!(client = %client, nonce, "dropped client response");
        }
    }

    fn respond_get_partial(
        &self,
        us: VirtualServerId,
        client: ServerId,
        nonce: u64,
        status: NetworkReturnCode,
        attrs: Vec<(u16, Bytes)>,
    ) {
        let sent = self.comm.send_client(
            us,
            client,
            Message::RespGetPartial {
                nonce,
                status,
                attrs,
            },
        );

        if !sent {
            tracing::warn!(client = %client, nonce, "dropped partial get response");
        }
    }

    fn respond_get(
        &self,
        us: VirtualServerId,
        client: ServerId,
        nonce: u64,
        status: NetworkReturnCode,
        value: Option<PackedTuple>,
    ) {
        let sent = self.comm.send_client(
            us,
            client,
            Message::RespGet {
                nonce,
                status,
                value,
            },
        );

        if !sent {
            tracing::warn!(client = %client, nonce, "dropped get response");
        }
    }

    pub(crate) fn send_ack(
        &self,
        us: VirtualServerId,
        to: VirtualServerId,
        version: Version,
        key: &Bytes,
    ) {
        let epoch = self.epoch();
        let sent = self.comm.send(
            us,
            to,
            epoch,
            Message::ChainAck {
                version,
                key: key.clone(),
            },
        );

        if !sent {
            tracing::debug!(to = %to, version = %version, "dropped chain ack");
        }
    }

    /// Issues the downstream message for `op` per the chain routing
    /// rules. An operation is forwarded at most once per configuration
    /// epoch; retransmissions clear the sent marker first.
    pub(crate) fn send_message(
        &self,
        us: VirtualServerId,
        retransmission: bool,
        key: &Bytes,
        op: &mut KeyOperation,
    ) -> SendOutcome {
        if !retransmission && !op.sent.is_none() {
            return SendOutcome::Sent;
        }

        let config = self.config();
        let epoch = config.epoch();
        let Some(region) = config.region_of(us) else {
            return SendOutcome::Dropped;
        };
        let at_tail = config.tail_of_region(region) == us;

        enum Kind {
            Op,
            Subspace,
        }

        let (dest, kind) = if op.this_old_region == op.this_new_region {
            if !at_tail {
                (config.next_in_region(us), Kind::Op)
            } else if !op.next_region.is_none() {
                (config.head_of_region(op.next_region), Kind::Op)
            } else {
                return SendOutcome::NoDownstream;
            }
        } else if region == op.this_old_region {
            if !at_tail {
                (config.next_in_region(us), Kind::Op)
            } else {
                (config.head_of_region(op.this_new_region), Kind::Subspace)
            }
        } else if region == op.this_new_region {
            if !at_tail {
                (config.next_in_region(us), Kind::Subspace)
            } else if !op.next_region.is_none() {
                (config.head_of_region(op.next_region), Kind::Op)
            } else {
                return SendOutcome::NoDownstream;
            }
        } else {
            tracing::error!(
                vsi = %us,
                region = %region,
                op = %op.describe(key),
                "operation does not belong to this region; dropping send"
            );
            self.note_corruption();
            return SendOutcome::Dropped;
        };

        if dest.is_none() {
            tracing::warn!(
                vsi = %us,
                op = %op.describe(key),
                "no destination for downstream send"
            );
            return SendOutcome::Dropped;
        }

        let message = match kind {
            Kind::Op => Message::ChainOp {
                fresh: op.fresh,
                has_value: op.has_value,
                old_version: op.prev_version,
                new_version: op.this_version,
                key: key.clone(),
                value: op.value.clone(),
            },
            Kind::Subspace => Message::ChainSubspace {
                old_version: op.prev_version,
                new_version: op.this_version,
                key: key.clone(),
                value: op.value.clone(),
                hashes: op.new_hashes.clone(),
                prev_region: op.prev_region,
                this_old_region: op.this_old_region,
                this_new_region: op.this_new_region,
                next_region: op.next_region,
            },
        };

        if self.comm.send(us, dest, epoch, message) {
            op.set_sent(epoch, dest);
            SendOutcome::Sent
        } else {
            SendOutcome::Dropped
        }
    }

    // ========================================================================
    // Key-state access
    // ========================================================================

    fn get_or_create_key_state(
        &self,
        region: RegionId,
        key: &Bytes,
    ) -> Option<StateRef<'_, KeyState>> {
        let key_region = KeyRegion::new(region, key.clone());
        let ks = self.key_states.get_or_create(&key_region);

        if !ks.ensure_initialized(self.data.as_ref()) {
            return None;
        }

        Some(ks)
    }
}
