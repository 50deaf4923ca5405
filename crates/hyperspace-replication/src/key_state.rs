//! The per-key state machine.
//!
//! Each key-state owns every in-flight operation for one `(region, key)`
//! pair: three ordered queues plus the on-disk snapshot.
//!
//! - *deferred*: arrived out of order; waiting for an ancestor.
//! - *blocked*: next in line but held by a barrier (fresh inserts and
//!   deletes drain the committable queue first).
//! - *committable*: forwarded downstream; awaiting acknowledgment.
//!
//! Work arrives through four lock-free input queues, one per message
//! kind. Each enqueue call is fast and sets the work up to be done:
//! whichever thread observes that no one is advancing the machine takes
//! ownership (the work bit) and drains until quiescent, while later
//! enqueuers just mark `needs_work` and return. The state mutex guards
//! only the ownership flags; the owner takes the machine out and works
//! on it unlocked, so enqueuers never wait behind storage or transport
//! calls.
//!
//! Within a key, the concatenation `committable ++ blocked ++ deferred`
//! is strictly increasing in version, the on-disk version never exceeds
//! the committable front, and an operation is forwarded downstream
//! exactly once per configuration epoch.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use hyperspace_config::Configuration;
use hyperspace_data::{
    AttributeCheck, DataError, Funcall, PackedTuple, Schema, apply_funcs, hash_tuple,
    passes_attribute_checks,
};
use hyperspace_storage::DataLayer;
use hyperspace_types::{
    ConfigEpoch, NetworkReturnCode, RegionId, SequenceId, ServerId, Version, VirtualServerId,
};

use crate::key_operation::{ClientRef, KeyOperation, OpPath};
use crate::key_region::KeyRegion;
use crate::manager::{ReplicationManager, SendOutcome};
use crate::state_table::TableState;

// ============================================================================
// Input stubs
// ============================================================================

pub(crate) struct StubClientAtomic {
    pub from: ServerId,
    pub nonce: u64,
    pub erase: bool,
    pub fail_if_not_found: bool,
    pub fail_if_found: bool,
    pub checks: Vec<AttributeCheck>,
    pub funcs: Vec<Funcall>,
}

pub(crate) struct StubChainOp {
    pub from: VirtualServerId,
    pub epoch: ConfigEpoch,
    pub old_version: Version,
    pub new_version: Version,
    pub fresh: bool,
    pub has_value: bool,
    pub value: PackedTuple,
}

pub(crate) struct StubChainSubspace {
    pub from: VirtualServerId,
    pub epoch: ConfigEpoch,
    pub old_version: Version,
    pub new_version: Version,
    pub value: PackedTuple,
    pub hashes: Vec<u64>,
    pub prev_region: RegionId,
    pub this_old_region: RegionId,
    pub this_new_region: RegionId,
    pub next_region: RegionId,
}

pub(crate) struct StubChainAck {
    pub from: VirtualServerId,
    pub epoch: ConfigEpoch,
    pub version: Version,
}

// ============================================================================
// The machine proper
// ============================================================================

/// The queue state owned by whichever thread holds the work bit.
#[derive(Default)]
struct Machine {
    initialized: bool,
    /// Set when a persistence error leaves the chain's view of history
    /// untrustworthy; the state refuses further work until the next
    /// reconfiguration.
    wedged: bool,

    has_old_value: bool,
    old_version: Version,
    old_value: PackedTuple,

    committable: VecDeque<KeyOperation>,
    blocked: VecDeque<KeyOperation>,
    deferred: VecDeque<KeyOperation>,
}

impl Machine {
    fn queues_empty(&self) -> bool {
        self.committable.is_empty() && self.blocked.is_empty() && self.deferred.is_empty()
    }

    /// The latest visible version: blocked tail, else committable tail,
    /// else the on-disk snapshot.
    fn get_latest(&self) -> (bool, Version, Option<&PackedTuple>) {
        if let Some(op) = self.blocked.back() {
            return (op.has_value, op.this_version, Some(&op.value));
        }

        if let Some(op) = self.committable.back() {
            return (op.has_value, op.this_version, Some(&op.value));
        }

        if self.has_old_value {
            (true, self.old_version, Some(&self.old_value))
        } else {
            (false, self.old_version, None)
        }
    }

    fn find_version(&self, version: Version) -> Option<&KeyOperation> {
        self.committable
            .iter()
            .chain(self.blocked.iter())
            .chain(self.deferred.iter())
            .find(|op| op.this_version == version)
    }

    fn update_recv(&mut self, version: Version, epoch: ConfigEpoch, from: VirtualServerId) {
        for op in self
            .committable
            .iter_mut()
            .chain(self.blocked.iter_mut())
            .chain(self.deferred.iter_mut())
        {
            if op.this_version == version {
                op.set_recv(epoch, from);
                return;
            }
        }
    }

    fn insert_deferred(&mut self, op: KeyOperation) {
        // Linear search from the tail; the common case is append.
        let mut idx = self.deferred.len();

        while idx > 0 && self.deferred[idx - 1].this_version > op.this_version {
            idx -= 1;
        }

        debug_assert!(
            idx == self.deferred.len() || self.deferred[idx].this_version != op.this_version,
            "duplicate versions are filtered before insertion"
        );
        self.deferred.insert(idx, op);
    }

    fn mark_acked(&mut self, version: Version) {
        for op in self.committable.iter_mut() {
            if op.this_version == version {
                op.acked = true;
                return;
            }
        }
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        let mut version = Version::ZERO;

        for op in self
            .committable
            .iter()
            .chain(self.blocked.iter())
            .chain(self.deferred.iter())
        {
            assert!(version < op.this_version, "queues must strictly increase");
            version = op.this_version;
        }

        if let Some(front) = self.committable.front() {
            assert!(self.old_version <= front.this_version);
        }

        if let Some(front) = self.blocked.front() {
            assert!(self.old_version < front.this_version);
        }

        if let Some(front) = self.deferred.front() {
            assert!(self.old_version < front.this_version);
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self) {}
}

/// Ownership flags plus the parked machine. The owner takes the machine
/// out, so this mutex is only ever held for flag flips.
struct Control {
    working: bool,
    needs_work: bool,
    machine: Option<Box<Machine>>,
}

// ============================================================================
// KeyState
// ============================================================================

/// All state for one `(region, key)` pair. See the module docs for the
/// queue discipline.
pub struct KeyState {
    region: RegionId,
    key: Bytes,

    client_atomics: SegQueue<StubClientAtomic>,
    chain_ops: SegQueue<StubChainOp>,
    chain_subspaces: SegQueue<StubChainSubspace>,
    chain_acks: SegQueue<StubChainAck>,

    control: Mutex<Control>,
    avail: Condvar,
}

impl TableState for KeyState {
    type Key = KeyRegion;

    fn new_state(key: &KeyRegion) -> Self {
        Self {
            region: key.region,
            key: key.key.clone(),
            client_atomics: SegQueue::new(),
            chain_ops: SegQueue::new(),
            chain_subspaces: SegQueue::new(),
            chain_acks: SegQueue::new(),
            control: Mutex::new(Control {
                working: false,
                needs_work: false,
                machine: Some(Box::default()),
            }),
            avail: Condvar::new(),
        }
    }

    fn finished(&self) -> bool {
        if !(self.client_atomics.is_empty()
            && self.chain_ops.is_empty()
            && self.chain_subspaces.is_empty()
            && self.chain_acks.is_empty())
        {
            return false;
        }

        // A held control lock or an absent machine means a thread is
        // working this key right now.
        match self.control.try_lock() {
            Ok(control) => {
                !control.working
                    && control
                        .machine
                        .as_ref()
                        .is_some_and(|m| m.queues_empty())
            }
            Err(_) => false,
        }
    }
}

impl KeyState {
    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn state_key(&self) -> KeyRegion {
        KeyRegion::new(self.region, self.key.clone())
    }

    /// Loads the on-disk snapshot. Idempotent; returns `false` when the
    /// read failed, in which case the caller drops the triggering
    /// message.
    pub(crate) fn ensure_initialized(&self, data: &dyn DataLayer) -> bool {
        self.with_exclusive(|machine| {
            if machine.initialized {
                return true;
            }

            match data.get(self.region, &self.key) {
                Ok(Some((value, version))) => {
                    machine.has_old_value = true;
                    machine.old_version = version;
                    machine.old_value = value;
                }
                Ok(None) => {
                    machine.has_old_value = false;
                    machine.old_version = Version::ZERO;
                }
                Err(err) => {
                    tracing::warn!(
                        region = %self.region,
                        error = %err,
                        "failed to initialize key-state from storage"
                    );
                    return false;
                }
            }

            machine.initialized = true;
            true
        })
    }

    // ========================================================================
    // Enqueue entry points
    // ========================================================================

    pub(crate) fn enqueue_client_atomic(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        stub: StubClientAtomic,
    ) {
        self.client_atomics.push(stub);
        self.work_state_machine_or_pass_the_buck(mgr, us, schema);
    }

    pub(crate) fn enqueue_chain_op(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        stub: StubChainOp,
    ) {
        self.chain_ops.push(stub);
        self.work_state_machine_or_pass_the_buck(mgr, us, schema);
    }

    pub(crate) fn enqueue_chain_subspace(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        stub: StubChainSubspace,
    ) {
        self.chain_subspaces.push(stub);
        self.work_state_machine_or_pass_the_buck(mgr, us, schema);
    }

    pub(crate) fn enqueue_chain_ack(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        stub: StubChainAck,
    ) {
        self.chain_acks.push(stub);
        self.work_state_machine_or_pass_the_buck(mgr, us, schema);
    }

    // ========================================================================
    // Work-bit discipline
    // ========================================================================

    fn work_state_machine_or_pass_the_buck(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
    ) {
        let mut machine = {
            let mut control = self.control.lock().expect("key-state poisoned");

            if control.working {
                control.needs_work = true;
                return;
            }

            control.working = true;
            control.machine.take().expect("machine parked while idle")
        };

        loop {
            self.work_state_machine(mgr, us, schema, &mut machine);

            let mut control = self.control.lock().expect("key-state poisoned");

            if !control.needs_work {
                control.machine = Some(machine);
                control.working = false;
                drop(control);
                self.avail.notify_all();
                return;
            }

            control.needs_work = false;
        }
    }

    /// Waits for the work bit, then runs `f` with exclusive access to
    /// the machine. Input queues are not drained; use
    /// [`Self::work_now`] afterwards when `f` may have created work.
    fn with_exclusive<R>(&self, f: impl FnOnce(&mut Machine) -> R) -> R {
        let mut machine = {
            let mut control = self.control.lock().expect("key-state poisoned");

            while control.working {
                control = self.avail.wait(control).expect("key-state poisoned");
            }

            control.working = true;
            control.machine.take().expect("machine parked while idle")
        };

        let result = f(&mut machine);

        let mut control = self.control.lock().expect("key-state poisoned");
        control.machine = Some(machine);
        control.working = false;
        drop(control);
        self.avail.notify_all();
        result
    }

    /// Drives the machine through one full drain, for callers (the
    /// retransmitter, tests) that need queued work applied now.
    pub(crate) fn work_now(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
    ) {
        let mut machine = {
            let mut control = self.control.lock().expect("key-state poisoned");

            while control.working {
                control = self.avail.wait(control).expect("key-state poisoned");
            }

            control.working = true;
            control.machine.take().expect("machine parked while idle")
        };

        loop {
            self.work_state_machine(mgr, us, schema, &mut machine);

            let mut control = self.control.lock().expect("key-state poisoned");

            if !control.needs_work {
                control.machine = Some(machine);
                control.working = false;
                drop(control);
                self.avail.notify_all();
                return;
            }

            control.needs_work = false;
        }
    }

    // ========================================================================
    // Drains
    // ========================================================================

    fn work_state_machine(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        machine: &mut Machine,
    ) {
        if machine.wedged {
            self.drop_inputs_while_wedged(mgr, us);
            return;
        }

        // Client atomics assign versions against the latest visible
        // value, so each one is applied and moved out of deferred before
        // the next is examined.
        while let Some(stub) = self.client_atomics.pop() {
            self.do_client_atomic(mgr, us, schema, machine, stub);
            self.move_operations_between_queues(mgr, us, schema, machine);
        }

        while let Some(stub) = self.chain_ops.pop() {
            self.do_chain_op(mgr, us, machine, stub);
        }

        while let Some(stub) = self.chain_subspaces.pop() {
            self.do_chain_subspace(mgr, us, machine, stub);
        }

        while let Some(stub) = self.chain_acks.pop() {
            self.do_chain_ack(mgr, us, machine, stub);
        }

        self.move_operations_between_queues(mgr, us, schema, machine);
        machine.check_invariants();
    }

    fn drop_inputs_while_wedged(&self, mgr: &ReplicationManager, us: VirtualServerId) {
        while let Some(stub) = self.client_atomics.pop() {
            mgr.respond_to_client(us, stub.from, stub.nonce, NetworkReturnCode::ServerError);
        }

        let mut dropped = 0usize;

        while self.chain_ops.pop().is_some() {
            dropped += 1;
        }

        while self.chain_subspaces.pop().is_some() {
            dropped += 1;
        }

        while self.chain_acks.pop().is_some() {
            dropped += 1;
        }

        if dropped > 0 {
            tracing::warn!(
                key = %self.state_key(),
                dropped,
                "wedged key-state refusing chain traffic until reconfiguration"
            );
        }
    }

    fn do_client_atomic(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        machine: &mut Machine,
        stub: StubClientAtomic,
    ) {
        if mgr.read_only() {
            mgr.respond_to_client(us, stub.from, stub.nonce, NetworkReturnCode::ReadOnly);
            return;
        }

        let (has_old_value, old_version, old_value) = machine.get_latest();

        if let Err(rc) = check_version(
            schema,
            &self.key,
            stub.erase,
            stub.fail_if_not_found,
            stub.fail_if_found,
            &stub.checks,
            has_old_value,
            old_value,
        ) {
            mgr.respond_to_client(us, stub.from, stub.nonce, rc);
            return;
        }

        let (has_value, value) = if stub.erase {
            (false, PackedTuple::unset(schema))
        } else {
            match apply_funcs(schema, &stub.funcs, &self.key, old_value) {
                Ok(value) => (true, value),
                Err(DataError::Overflow { .. }) => {
                    mgr.respond_to_client(us, stub.from, stub.nonce, NetworkReturnCode::Overflow);
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        key = %self.state_key(),
                        error = %err,
                        "client atomic rejected by funcall application"
                    );
                    mgr.respond_to_client(
                        us,
                        stub.from,
                        stub.nonce,
                        NetworkReturnCode::ServerError,
                    );
                    return;
                }
            }
        };

        let mut op = KeyOperation::continuous(
            old_version,
            old_version.next(),
            !has_old_value,
            has_value,
            value,
        );
        op.reg_id = self.region;
        op.seq_id = mgr.generate_seq_id(self.region);
        op.client = Some(ClientRef {
            client: stub.from,
            nonce: stub.nonce,
        });
        machine.insert_deferred(op);
        machine.check_invariants();
    }

    fn do_chain_op(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        machine: &mut Machine,
        stub: StubChainOp,
    ) {
        // A version at or below the on-disk snapshot is a stale
        // retransmission of something already durable here; re-ack so
        // the upstream can retire it.
        if !stub.new_version.is_zero() && stub.new_version <= machine.old_version {
            tracing::debug!(
                key = %self.state_key(),
                version = %stub.new_version,
                on_disk = %machine.old_version,
                "re-acking stale chain op"
            );
            mgr.send_ack(us, stub.from, stub.new_version, &self.key);
            return;
        }

        if let Some(existing) = machine.find_version(stub.new_version) {
            // Receivers are idempotent by (region, version): remember
            // the newest upstream and re-ack if we already acked.
            let acked = existing.acked;
            machine.update_recv(stub.new_version, stub.epoch, stub.from);

            if acked {
                mgr.send_ack(us, stub.from, stub.new_version, &self.key);
            }

            return;
        }

        let mut op = KeyOperation::continuous(
            stub.old_version,
            stub.new_version,
            stub.fresh,
            stub.has_value,
            stub.value,
        );
        op.set_recv(stub.epoch, stub.from);
        op.reg_id = self.region;
        op.seq_id = mgr.generate_seq_id(self.region);
        machine.insert_deferred(op);
        machine.check_invariants();
    }

    fn do_chain_subspace(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        machine: &mut Machine,
        stub: StubChainSubspace,
    ) {
        if !stub.new_version.is_zero() && stub.new_version <= machine.old_version {
            tracing::debug!(
                key = %self.state_key(),
                version = %stub.new_version,
                on_disk = %machine.old_version,
                "re-acking stale chain subspace op"
            );
            mgr.send_ack(us, stub.from, stub.new_version, &self.key);
            return;
        }

        if let Some(existing) = machine.find_version(stub.new_version) {
            let acked = existing.acked;
            machine.update_recv(stub.new_version, stub.epoch, stub.from);

            if acked {
                mgr.send_ack(us, stub.from, stub.new_version, &self.key);
            }

            return;
        }

        let mut op = KeyOperation::discontinuous(
            stub.old_version,
            stub.new_version,
            stub.value,
            stub.hashes,
            stub.prev_region,
            stub.this_old_region,
            stub.this_new_region,
            stub.next_region,
        );
        op.set_recv(stub.epoch, stub.from);
        op.reg_id = self.region;
        op.seq_id = mgr.generate_seq_id(self.region);
        machine.insert_deferred(op);
        machine.check_invariants();
    }

    fn do_chain_ack(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        machine: &mut Machine,
        stub: StubChainAck,
    ) {
        let epoch = mgr.epoch();
        let Some(op) = machine
            .committable
            .iter_mut()
            .find(|op| op.this_version == stub.version)
        else {
            tracing::debug!(
                key = %self.state_key(),
                version = %stub.version,
                "ignoring ack for unknown version"
            );
            return;
        };

        // Acks from an earlier epoch refer to sends this epoch may have
        // rerouted; the retransmitter will earn a fresh ack.
        if stub.epoch != epoch || op.sent != stub.from || op.sent_epoch != epoch {
            tracing::debug!(
                key = %self.state_key(),
                version = %stub.version,
                ack_epoch = %stub.epoch,
                "ignoring ack from another configuration epoch"
            );
            return;
        }

        op.acked = true;
        self.process_acked_prefix(mgr, us, machine);
    }

    /// Retires the acked prefix of the committable queue: persist, then
    /// acknowledge upstream (or answer the client), then collect the
    /// sequence id. Nothing is acknowledged upstream before it is
    /// durable here.
    fn process_acked_prefix(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        machine: &mut Machine,
    ) {
        while machine.committable.front().is_some_and(|op| op.acked) {
            let op = machine
                .committable
                .pop_front()
                .expect("front checked above");

            if !self.persist_to_datalayer(mgr, machine, &op) {
                tracing::error!(
                    key = %self.state_key(),
                    version = %op.this_version,
                    "persistence failed; wedging key-state until reconfiguration"
                );
                machine.committable.push_front(op);
                machine.wedged = true;
                return;
            }

            if let Some(client) = op.client {
                mgr.respond_to_client(us, client.client, client.nonce, NetworkReturnCode::Success);
            } else if !op.recv.is_none() && op.recv_epoch == mgr.epoch() {
                mgr.send_ack(us, op.recv, op.this_version, &self.key);
            }

            mgr.collect_seq_id(op.reg_id, op.seq_id);
        }

        machine.check_invariants();

        if machine.committable.is_empty() {
            mgr.note_committable_drained();
        }
    }

    /// Applies one committed version to the storage adapter. On a
    /// subspace transfer the donor side deletes and the recipient side
    /// puts; a region on both sides overwrites.
    fn persist_to_datalayer(
        &self,
        mgr: &ReplicationManager,
        machine: &mut Machine,
        op: &KeyOperation,
    ) -> bool {
        let data = mgr.data();

        if machine.old_version >= op.this_version {
            data.mark_acked(self.region, op.seq_id);
            return true;
        }

        let deleting = !op.has_value
            || (op.this_old_region != op.this_new_region && self.region == op.this_old_region);
        let result = if deleting {
            if machine.has_old_value {
                data.delete(self.region, op.seq_id, &self.key, &machine.old_value)
            } else {
                data.mark_acked(self.region, op.seq_id);
                Ok(())
            }
        } else if machine.has_old_value {
            data.overwrite(
                self.region,
                op.seq_id,
                &self.key,
                &machine.old_value,
                &op.value,
                op.this_version,
            )
        } else {
            data.put(
                self.region,
                op.seq_id,
                &self.key,
                &op.value,
                op.this_version,
            )
        };

        if let Err(err) = result {
            tracing::error!(
                key = %self.state_key(),
                version = %op.this_version,
                error = %err,
                "storage write failed"
            );
            return false;
        }

        // The donor side of a transfer no longer holds the value even
        // though the operation carries one.
        machine.has_old_value = op.has_value && !deleting;
        machine.old_version = op.this_version;
        machine.old_value = op.value.clone();
        true
    }

    // ========================================================================
    // Queue movement
    // ========================================================================

    fn move_operations_between_queues(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
        machine: &mut Machine,
    ) {
        let config = mgr.config();

        // deferred -> blocked
        while !machine.deferred.is_empty() {
            let (_, old_version, _) = machine.get_latest();

            if old_version >= machine.deferred[0].this_version {
                let op = machine.deferred.pop_front().expect("checked non-empty");
                tracing::warn!(
                    key = %self.state_key(),
                    seen = %old_version,
                    version = %op.this_version,
                    "dropping deferred chain op sent out of order"
                );
                mgr.collect_seq_id(op.reg_id, op.seq_id);
                continue;
            }

            let front = &machine.deferred[0];
            let continuous_here = front.this_old_region == front.this_new_region
                || front.this_old_region == self.region;

            // Out-of-order arrivals wait for their ancestor, unless this
            // is a fresh insert or the receiving side of a subspace
            // transfer (which has no ancestor here by construction).
            if old_version.next() != front.this_version && !front.fresh && continuous_here {
                break;
            }

            if continuous_here && !self.hash_and_filter(mgr, us, &config, schema, machine) {
                continue;
            }

            let op = machine.deferred.pop_front().expect("checked non-empty");
            machine.blocked.push_back(op);
        }

        // blocked -> committable
        while let Some(front) = machine.blocked.front() {
            // Fresh inserts and deletes act as ordering barriers: drain
            // the committable queue before issuing them.
            if (front.fresh || !front.has_value) && !machine.committable.is_empty() {
                break;
            }

            let mut op = machine.blocked.pop_front().expect("front checked above");
            let outcome = mgr.send_message(us, false, &self.key, &mut op);
            let version = op.this_version;
            machine.committable.push_back(op);

            if outcome == SendOutcome::NoDownstream {
                machine.mark_acked(version);
            }
        }

        self.process_acked_prefix(mgr, us, machine);
    }

    /// Hashes the deferred front into its four region ids and applies
    /// the locality checks of the continuous path. Returns `false` when
    /// the front was dropped.
    fn hash_and_filter(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        config: &Configuration,
        schema: &Schema,
        machine: &mut Machine,
    ) -> bool {
        let (has_old_value, _, old_value) = machine.get_latest();
        let old_value = old_value.cloned();
        let front = &mut machine.deferred[0];

        hash_objects(
            config,
            self.region,
            schema,
            &self.key,
            front,
            has_old_value,
            old_value.as_ref(),
        );

        let right_host =
            front.this_old_region == self.region || front.this_new_region == self.region;
        let right_sender = front.recv.is_none()
            || config.next_in_region(front.recv) == us
            || config.subspace_adjacent(front.recv, us);

        if !right_host {
            let op = machine.deferred.pop_front().expect("front exists");
            tracing::info!(
                key = %self.state_key(),
                version = %op.this_version,
                "dropping chain op which didn't get sent to the right host"
            );
            mgr.collect_seq_id(op.reg_id, op.seq_id);
            return false;
        }

        if !right_sender {
            let op = machine.deferred.pop_front().expect("front exists");
            tracing::info!(
                key = %self.state_key(),
                version = %op.this_version,
                sender = %op.recv,
                "dropping chain op which didn't come from the right host"
            );
            mgr.collect_seq_id(op.reg_id, op.seq_id);
            return false;
        }

        true
    }

    // ========================================================================
    // Control-plane hooks
    // ========================================================================

    /// Reconfiguration: deferred operations were never forwarded and
    /// their senders may no longer be our neighbors; drop them and let
    /// upstream retransmission rebuild the queue. Wedged states get a
    /// clean slate.
    pub(crate) fn reconfigure(&self, mgr: &ReplicationManager) {
        self.with_exclusive(|machine| {
            for op in machine.deferred.drain(..) {
                mgr.collect_seq_id(op.reg_id, op.seq_id);
            }

            machine.wedged = false;
        });
    }

    /// Whether every forwarded operation has been acknowledged and
    /// retired (the checkpoint stability condition for this key).
    pub(crate) fn committable_is_empty(&self) -> bool {
        self.with_exclusive(|machine| machine.committable.is_empty())
    }

    /// Appends the in-flight `(region, sequence id)` pairs for gap
    /// closing.
    pub(crate) fn append_seq_ids(&self, out: &mut Vec<(RegionId, SequenceId)>) {
        self.with_exclusive(|machine| {
            for op in machine
                .committable
                .iter()
                .chain(machine.blocked.iter())
                .chain(machine.deferred.iter())
            {
                out.push((op.reg_id, op.seq_id));
            }
        });
    }

    /// Re-emits committable operations whose downstream send predates
    /// the current epoch, then drives the machine. Duplicates are safe:
    /// receivers are idempotent by `(region, version)`.
    pub(crate) fn resend_committable(
        &self,
        mgr: &ReplicationManager,
        us: VirtualServerId,
        schema: &Schema,
    ) {
        self.with_exclusive(|machine| {
            if machine.wedged {
                return;
            }

            let epoch = mgr.epoch();
            let mut acked = Vec::new();

            for op in machine.committable.iter_mut() {
                if op.acked || op.sent_epoch == epoch {
                    continue;
                }

                op.clear_sent();

                if mgr.send_message(us, true, &self.key, op) == SendOutcome::NoDownstream {
                    acked.push(op.this_version);
                }
            }

            for version in acked {
                machine.mark_acked(version);
            }

            self.process_acked_prefix(mgr, us, machine);
        });
        self.work_now(mgr, us, schema);
    }

    /// Logs the queue contents for post-mortem debugging.
    pub(crate) fn debug_dump(&self) {
        self.with_exclusive(|machine| {
            for (name, queue) in [
                ("committable", &machine.committable),
                ("blocked", &machine.blocked),
                ("deferred", &machine.deferred),
            ] {
                for op in queue {
                    tracing::info!(
                        key = %self.state_key(),
                        queue = name,
                        op = %op.describe(&self.key),
                        "debug dump"
                    );
                }
            }
        });
    }
}

// ============================================================================
// Pure helpers
// ============================================================================

/// Evaluates the whole-operation predicates and attribute checks of a
/// client atomic against the latest visible value.
fn check_version(
    schema: &Schema,
    key: &Bytes,
    erase: bool,
    fail_if_not_found: bool,
    fail_if_found: bool,
    checks: &[AttributeCheck],
    has_old_value: bool,
    old_value: Option<&PackedTuple>,
) -> Result<(), NetworkReturnCode> {
    if !has_old_value && erase {
        return Err(NetworkReturnCode::NotFound);
    }

    if !has_old_value && fail_if_not_found {
        return Err(NetworkReturnCode::NotFound);
    }

    if has_old_value && fail_if_found {
        return Err(NetworkReturnCode::CmpFail);
    }

    if checks.is_empty() {
        return Ok(());
    }

    // Non-empty checks require an old value to check against.
    let Some(old_value) = old_value else {
        return Err(NetworkReturnCode::CmpFail);
    };

    if passes_attribute_checks(schema, checks, key, old_value) == checks.len() {
        Ok(())
    } else {
        Err(NetworkReturnCode::CmpFail)
    }
}

/// Fills the four region ids of a continuous operation by hashing the
/// old and new values into this, the previous, and the next subspace.
fn hash_objects(
    config: &Configuration,
    region: RegionId,
    schema: &Schema,
    key: &Bytes,
    op: &mut KeyOperation,
    has_old_value: bool,
    old_value: Option<&PackedTuple>,
) {
    op.path = OpPath::Continuous;
    op.prev_region = RegionId::NONE;
    op.this_old_region = RegionId::NONE;
    op.this_new_region = RegionId::NONE;
    op.next_region = RegionId::NONE;

    let subspace_this = config.subspace_of(region);
    let subspace_prev = config.subspace_prev(subspace_this);
    let subspace_next = config.subspace_next(subspace_this);

    let has_new_value = op.has_value;
    // A delete carries no tuple; hash the prior value on both sides so
    // the delete follows the object's existing chain.
    let old_value = old_value.unwrap_or(&op.value);

    let (old_hashes, new_hashes) = if has_old_value && has_new_value {
        match (
            hash_tuple(schema, key, old_value),
            hash_tuple(schema, key, &op.value),
        ) {
            (Ok(old), Ok(new)) => (old, new),
            _ => return,
        }
    } else if has_old_value {
        match hash_tuple(schema, key, old_value) {
            Ok(old) => (old.clone(), old),
            Err(_) => return,
        }
    } else if has_new_value {
        match hash_tuple(schema, key, &op.value) {
            Ok(new) => (new.clone(), new),
            Err(_) => return,
        }
    } else {
        // A delete of a key with no visible prior value never reaches
        // the queues; the client atomic was refused with NOTFOUND.
        return;
    };

    if !subspace_prev.is_none() {
        op.prev_region = config.lookup_region(subspace_prev, &new_hashes);
    }

    op.this_old_region = config.lookup_region(subspace_this, &old_hashes);
    op.this_new_region = config.lookup_region(subspace_this, &new_hashes);

    if !subspace_next.is_none() {
        op.next_region = config.lookup_region(subspace_next, &old_hashes);
    }

    op.old_hashes = old_hashes;
    op.new_hashes = new_hashes;
}
