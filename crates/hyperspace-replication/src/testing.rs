//! In-process cluster plumbing for tests.
//!
//! [`LoopbackNetwork`] implements [`Communication`] by encoding every
//! message through the wire codec into a shared frame queue;
//! [`TestCluster`] hosts one [`ReplicationManager`] per server and pumps
//! frames between them, so integration tests exercise the real codec,
//! routing, and state machines without sockets or threads.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hyperspace_config::Configuration;
use hyperspace_data::PackedTuple;
use hyperspace_storage::{DataLayer, MemoryDataLayer};
use hyperspace_types::{
    ConfigEpoch, NetworkReturnCode, RegionId, ServerId, Version, VirtualServerId,
};
use hyperspace_wire::{Envelope, Message, decode_frame, encode_frame};

use crate::communication::Communication;
use crate::coordinator::CoordinatorLink;
use crate::manager::{KeyChange, ReplicationManager};

/// The server id test clients present themselves as.
pub const CLIENT: ServerId = ServerId::new(0xC11E);

// ============================================================================
// LoopbackNetwork
// ============================================================================

#[derive(Default)]
struct NetInner {
    frames: VecDeque<Bytes>,
    client_frames: Vec<Bytes>,
    /// Servers currently unreachable; traffic to or from them is lost.
    partitioned: HashSet<ServerId>,
    /// Deliver every server-to-server frame twice, to prove receiver
    /// idempotence.
    duplicate_all: bool,
    config: Arc<Configuration>,
}

/// An in-process [`Communication`] built on the wire codec.
#[derive(Default)]
pub struct LoopbackNetwork {
    inner: Mutex<NetInner>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&self, config: Arc<Configuration>) {
        self.inner.lock().expect("network poisoned").config = config;
    }

    /// Makes `server` unreachable: frames to or from it are lost in
    /// flight, like a crashed or partitioned daemon.
    pub fn partition(&self, server: ServerId) {
        self.inner
            .lock()
            .expect("network poisoned")
            .partitioned
            .insert(server);
    }

    /// Heals a partition.
    pub fn heal(&self, server: ServerId) {
        self.inner
            .lock()
            .expect("network poisoned")
            .partitioned
            .remove(&server);
    }

    fn pop_frame(&self) -> Option<Bytes> {
        self.inner.lock().expect("network poisoned").frames.pop_front()
    }

    /// When set, every server-to-server frame is delivered twice.
    pub fn set_duplicate_all(&self, duplicate: bool) {
        self.inner.lock().expect("network poisoned").duplicate_all = duplicate;
    }

    /// Takes the decoded client responses accumulated so far.
    pub fn take_client_responses(&self) -> Vec<(VirtualServerId, Message)> {
        let frames: Vec<Bytes> = {
            let mut inner = self.inner.lock().expect("network poisoned");
            std::mem::take(&mut inner.client_frames)
        };

        frames
            .iter()
            .map(|frame| match decode_frame(frame) {
                Ok(Envelope::ToClient { from, message }) => (from, message),
                other => panic!("client frame failed to decode: {other:?}"),
            })
            .collect()
    }

    fn lost(inner: &NetInner, from: VirtualServerId, to: VirtualServerId) -> bool {
        let from_server = inner.config.server_of(from);
        let to_server = inner.config.server_of(to);
        from_server.is_none_or(|s| inner.partitioned.contains(&s))
            || to_server.is_none_or(|s| inner.partitioned.contains(&s))
    }
}

impl Communication for LoopbackNetwork {
    fn send(
        &self,
        from: VirtualServerId,
        to: VirtualServerId,
        epoch: ConfigEpoch,
        message: Message,
    ) -> bool {
        let mut inner = self.inner.lock().expect("network poisoned");

        // The transport accepted the frame; a partition loses it in
        // flight, exactly like a dead peer.
        if Self::lost(&inner, from, to) {
            return true;
        }

        let frame = encode_frame(&Envelope::Server {
            epoch,
            to,
            from,
            message,
        });

        if inner.duplicate_all {
            inner.frames.push_back(frame.clone());
        }

        inner.frames.push_back(frame);
        true
    }

    fn send_client(&self, from: VirtualServerId, _client: ServerId, message: Message) -> bool {
        let frame = encode_frame(&Envelope::ToClient { from, message });
        self.inner
            .lock()
            .expect("network poisoned")
            .client_frames
            .push(frame);
        true
    }
}

// ============================================================================
// RecordingCoordinator
// ============================================================================

/// A [`CoordinatorLink`] that records stability reports.
#[derive(Default)]
pub struct RecordingCoordinator {
    stable: Mutex<Vec<u64>>,
}

impl RecordingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stable_reports(&self) -> Vec<u64> {
        self.stable.lock().expect("coordinator poisoned").clone()
    }
}

impl CoordinatorLink for RecordingCoordinator {
    fn report_stable(&self, checkpoint: u64) {
        self.stable
            .lock()
            .expect("coordinator poisoned")
            .push(checkpoint);
    }
}

// ============================================================================
// TestCluster
// ============================================================================

/// One manager per server, joined by a [`LoopbackNetwork`].
pub struct TestCluster {
    pub net: Arc<LoopbackNetwork>,
    pub coordinator: Arc<RecordingCoordinator>,
    pub data: HashMap<ServerId, Arc<MemoryDataLayer>>,
    pub managers: HashMap<ServerId, Arc<ReplicationManager>>,
    config: Arc<Configuration>,
}

impl TestCluster {
    /// Builds a cluster hosting every server the configuration assigns
    /// work to, each with its own in-memory datalayer.
    pub fn new(config: Configuration) -> Self {
        let net = Arc::new(LoopbackNetwork::new());
        let coordinator = Arc::new(RecordingCoordinator::new());
        let config = Arc::new(config);
        net.set_config(Arc::clone(&config));

        let mut servers: Vec<ServerId> = Vec::new();

        for space in config.spaces() {
            for subspace in &space.subspaces {
                for region in &subspace.regions {
                    for vsi in &region.replicas {
                        let server = config.server_of(*vsi).expect("validated configuration");

                        if !servers.contains(&server) {
                            servers.push(server);
                        }
                    }
                }
            }
        }

        let mut data = HashMap::new();
        let mut managers = HashMap::new();

        for server in servers {
            let layer = Arc::new(MemoryDataLayer::new());
            let data_layer: Arc<dyn DataLayer> = layer.clone() as Arc<dyn DataLayer>;
            let comm: Arc<dyn Communication> = net.clone() as Arc<dyn Communication>;
            let link: Arc<dyn CoordinatorLink> = coordinator.clone() as Arc<dyn CoordinatorLink>;
            let manager = ReplicationManager::new(server, data_layer, comm, link);
            manager.reconfigure((*config).clone());
            data.insert(server, layer);
            managers.insert(server, manager);
        }

        Self {
            net,
            coordinator,
            data,
            managers,
            config,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Distributes a new configuration snapshot to every manager, like
    /// the coordinator would.
    pub fn reconfigure(&mut self, config: Configuration) {
        let config = Arc::new(config);
        self.net.set_config(Arc::clone(&config));

        for manager in self.managers.values() {
            manager.reconfigure((*config).clone());
        }

        self.config = config;
    }

    fn manager_for(&self, vsi: VirtualServerId) -> Option<&Arc<ReplicationManager>> {
        let server = self.config.server_of(vsi)?;
        self.managers.get(&server)
    }

    /// Delivers queued frames until the network is quiet.
    pub fn pump(&self) {
        let mut delivered = 0usize;

        while let Some(frame) = self.net.pop_frame() {
            delivered += 1;
            assert!(delivered < 100_000, "network failed to quiesce");

            let envelope = match decode_frame(&frame) {
                Ok(envelope) => envelope,
                Err(err) => panic!("loopback frame failed to decode: {err}"),
            };

            let Envelope::Server {
                epoch,
                to,
                from,
                message,
            } = envelope
            else {
                panic!("unexpected envelope on the server network");
            };

            let Some(manager) = self.manager_for(to) else {
                continue;
            };

            match message {
                Message::ChainOp {
                    fresh,
                    has_value,
                    old_version,
                    new_version,
                    key,
                    value,
                } => manager.chain_op(
                    from, to, epoch, old_version, new_version, fresh, has_value, key, value,
                ),
                Message::ChainSubspace {
                    old_version,
                    new_version,
                    key,
                    value,
                    hashes,
                    prev_region,
                    this_old_region,
                    this_new_region,
                    next_region,
                } => manager.chain_subspace(
                    from,
                    to,
                    epoch,
                    old_version,
                    new_version,
                    key,
                    value,
                    hashes,
                    prev_region,
                    this_old_region,
                    this_new_region,
                    next_region,
                ),
                Message::ChainAck { version, key } => {
                    manager.chain_ack(from, to, epoch, version, &key);
                }
                Message::ConfigMismatch => {}
                other => panic!("client message {other:?} on the server network"),
            }
        }
    }

    /// Runs a repair pass on every manager, then drains the network.
    pub fn retransmit_all(&self) {
        for manager in self.managers.values() {
            manager.retransmit_cycle();
        }

        self.pump();
    }

    // ========================================================================
    // Client surface
    // ========================================================================

    /// Issues a REQ_ATOMIC to `to` and pumps the network to completion.
    pub fn client_atomic(&self, to: VirtualServerId, nonce: u64, key: &[u8], change: KeyChange) {
        self.manager_for(to)
            .expect("target virtual server is hosted")
            .client_atomic(CLIENT, to, nonce, Bytes::copy_from_slice(key), change);
        self.pump();
    }

    /// Issues a REQ_GET to `to` and pumps.
    pub fn client_get(&self, to: VirtualServerId, nonce: u64, key: &[u8]) {
        self.manager_for(to)
            .expect("target virtual server is hosted")
            .client_get(CLIENT, to, nonce, &Bytes::copy_from_slice(key));
        self.pump();
    }

    /// The status of the RESP_ATOMIC with `nonce`, if one arrived.
    pub fn atomic_status(&self, responses: &[(VirtualServerId, Message)], nonce: u64) -> Option<NetworkReturnCode> {
        responses.iter().find_map(|(_, message)| match message {
            Message::RespAtomic {
                nonce: n,
                status,
            } if *n == nonce => Some(*status),
            _ => None,
        })
    }

    /// The `(status, value)` of the RESP_GET with `nonce`, if one
    /// arrived.
    pub fn get_result(
        &self,
        responses: &[(VirtualServerId, Message)],
        nonce: u64,
    ) -> Option<(NetworkReturnCode, Option<PackedTuple>)> {
        responses.iter().find_map(|(_, message)| match message {
            Message::RespGet {
                nonce: n,
                status,
                value,
            } if *n == nonce => Some((*status, value.clone())),
            _ => None,
        })
    }

    /// The stored `(value, version)` for `key` in `region` on `server`.
    pub fn stored(
        &self,
        server: ServerId,
        region: RegionId,
        key: &[u8],
    ) -> Option<(PackedTuple, Version)> {
        self.data[&server]
            .get(region, &Bytes::copy_from_slice(key))
            .expect("memory datalayer reads are infallible")
    }
}
