//! End-to-end tests for the replication engine.
//!
//! Each test stands up an in-process cluster (real wire codec, loopback
//! transport, in-memory datalayers) and drives it through the client
//! surface.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use hyperspace_config::{Configuration, RegionConfig, SpaceConfig, SubspaceConfig};
use hyperspace_data::{
    AttrType, Attribute, AttributeCheck, FuncKind, Funcall, PackedTuple, Predicate, Schema,
    Value, hash_tuple,
};
use hyperspace_types::{
    ConfigEpoch, NetworkReturnCode, RegionId, ServerId, SpaceId, SubspaceId, Version,
    VirtualServerId,
};

use test_case::test_case;

use crate::manager::KeyChange;
use crate::testing::TestCluster;

fn vsi(id: u64) -> VirtualServerId {
    VirtualServerId::new(id)
}

fn kv_schema() -> Schema {
    Schema::new(
        "kv",
        vec![
            Attribute::new("u", AttrType::STRING),
            Attribute::new("v", AttrType::INT64),
        ],
    )
}

/// One space, one key subspace, one region, a chain of `links` virtual
/// servers each hosted by its own server (server id = vsi / 10).
fn chain_config(epoch: u64, links: u64) -> Configuration {
    let replicas: Vec<VirtualServerId> = (1..=links).map(|i| vsi(i * 10 + 1)).collect();
    let mut assignments = HashMap::new();

    for replica in &replicas {
        assignments.insert(*replica, ServerId::new(u64::from(*replica) / 10));
    }

    let spaces = vec![SpaceConfig {
        id: SpaceId::new(1),
        schema: kv_schema(),
        subspaces: vec![SubspaceConfig {
            id: SubspaceId::new(1),
            attrs: vec![0],
            regions: vec![RegionConfig {
                id: RegionId::new(1),
                lower: vec![0],
                upper: vec![u64::MAX],
                replicas,
            }],
        }],
    }];
    Configuration::new(ConfigEpoch::new(epoch), spaces, assignments).unwrap()
}

fn put_v(v: i64) -> KeyChange {
    KeyChange {
        funcs: vec![Funcall::new(1, FuncKind::Set, Value::Int(v))],
        ..KeyChange::default()
    }
}

fn erase() -> KeyChange {
    KeyChange {
        erase: true,
        ..KeyChange::default()
    }
}

fn int_tuple(schema: &Schema, v: i64) -> PackedTuple {
    PackedTuple::encode(schema, &[Value::Int(v)]).unwrap()
}

// ============================================================================
// Scenario A: insert, read, delete
// ============================================================================

#[test]
fn insert_read_delete() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let head = vsi(11);
    let tail = vsi(31);

    cluster.client_atomic(head, 1, b"k1", put_v(7));
    cluster.client_get(tail, 2, b"k1");
    cluster.client_atomic(head, 3, b"k1", erase());
    cluster.client_get(tail, 4, b"k1");

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    let (status, value) = cluster.get_result(&responses, 2).unwrap();
    assert_eq!(status, NetworkReturnCode::Success);
    assert_eq!(value, Some(int_tuple(&kv_schema(), 7)));
    assert_eq!(
        cluster.atomic_status(&responses, 3),
        Some(NetworkReturnCode::Success)
    );
    let (status, value) = cluster.get_result(&responses, 4).unwrap();
    assert_eq!(status, NetworkReturnCode::NotFound);
    assert_eq!(value, None);

    // Every replica dropped the object and collected the key-state.
    for server in [1, 2, 3] {
        let server = ServerId::new(server);
        assert_eq!(cluster.stored(server, RegionId::new(1), b"k1"), None);
        assert_eq!(cluster.managers[&server].resident_key_states(), 0);
    }
}

#[test_case(1 ; "single replica")]
#[test_case(2 ; "two replicas")]
#[test_case(5 ; "five replicas")]
fn put_commits_through_chains_of_any_length(links: u64) {
    let cluster = TestCluster::new(chain_config(1, links));
    let head = vsi(11);
    let tail = vsi(links * 10 + 1);

    cluster.client_atomic(head, 1, b"k1", put_v(42));
    cluster.client_get(tail, 2, b"k1");

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    let (status, value) = cluster.get_result(&responses, 2).unwrap();
    assert_eq!(status, NetworkReturnCode::Success);
    assert_eq!(value, Some(int_tuple(&kv_schema(), 42)));

    for link in 1..=links {
        assert_eq!(
            cluster.stored(ServerId::new(link), RegionId::new(1), b"k1"),
            Some((int_tuple(&kv_schema(), 42), Version::new(1)))
        );
    }
}

#[test]
fn delete_of_missing_key_is_notfound() {
    let cluster = TestCluster::new(chain_config(1, 1));
    cluster.client_atomic(vsi(11), 1, b"ghost", erase());

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::NotFound)
    );
}

#[test]
fn gets_never_bypass_the_tail() {
    let cluster = TestCluster::new(chain_config(1, 3));
    cluster.client_atomic(vsi(11), 1, b"k1", put_v(7));
    cluster.client_get(vsi(21), 2, b"k1");

    let responses = cluster.net.take_client_responses();
    let (status, value) = cluster.get_result(&responses, 2).unwrap();
    assert_eq!(status, NetworkReturnCode::ServerError);
    assert_eq!(value, None);
}

#[test]
fn partial_get_projects_attributes() {
    let (config, _, _) = transfer_config(1, "A", "B");
    let cluster = TestCluster::new(config);
    let head = vsi(11);

    cluster.client_atomic(head, 1, b"k", set_vw(9, "A"));

    let tail_manager = &cluster.managers[&ServerId::new(1)];
    tail_manager.client_get_partial(
        crate::testing::CLIENT,
        head,
        2,
        &Bytes::from_static(b"k"),
        &[2],
    );
    tail_manager.client_get_partial(
        crate::testing::CLIENT,
        head,
        3,
        &Bytes::from_static(b"k"),
        &[0],
    );
    tail_manager.client_get_partial(
        crate::testing::CLIENT,
        head,
        4,
        &Bytes::from_static(b"missing"),
        &[2],
    );

    let responses = cluster.net.take_client_responses();
    let partial = |nonce: u64| {
        responses.iter().find_map(|(_, m)| match m {
            hyperspace_wire::Message::RespGetPartial {
                nonce: n,
                status,
                attrs,
            } if *n == nonce => Some((*status, attrs.clone())),
            _ => None,
        })
    };

    let (status, attrs) = partial(2).unwrap();
    assert_eq!(status, NetworkReturnCode::Success);
    assert_eq!(attrs, vec![(2, Bytes::from_static(b"A"))]);

    // The key attribute is not projectable.
    let (status, attrs) = partial(3).unwrap();
    assert_eq!(status, NetworkReturnCode::ServerError);
    assert!(attrs.is_empty());

    let (status, attrs) = partial(4).unwrap();
    assert_eq!(status, NetworkReturnCode::NotFound);
    assert!(attrs.is_empty());
}

// ============================================================================
// Scenario B: CAS success and failure
// ============================================================================

#[test]
fn cas_succeeds_then_fails() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let head = vsi(11);
    let tail = vsi(31);

    cluster.client_atomic(head, 1, b"k1", put_v(7));

    let cond_put = |expect: i64, set: i64| KeyChange {
        checks: vec![AttributeCheck::new(1, Predicate::Equals(Value::Int(expect)))],
        funcs: vec![Funcall::new(1, FuncKind::Set, Value::Int(set))],
        ..KeyChange::default()
    };

    cluster.client_atomic(head, 2, b"k1", cond_put(7, 8));
    cluster.client_atomic(head, 3, b"k1", cond_put(7, 9));
    cluster.client_get(tail, 4, b"k1");

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 2),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.atomic_status(&responses, 3),
        Some(NetworkReturnCode::CmpFail)
    );
    let (status, value) = cluster.get_result(&responses, 4).unwrap();
    assert_eq!(status, NetworkReturnCode::Success);
    assert_eq!(value, Some(int_tuple(&kv_schema(), 8)));
}

#[test]
fn insert_if_absent_conflicts() {
    let cluster = TestCluster::new(chain_config(1, 1));
    let head = vsi(11);
    let put_if_absent = || KeyChange {
        fail_if_found: true,
        funcs: vec![Funcall::new(1, FuncKind::Set, Value::Int(1))],
        ..KeyChange::default()
    };

    cluster.client_atomic(head, 1, b"k1", put_if_absent());
    cluster.client_atomic(head, 2, b"k1", put_if_absent());

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.atomic_status(&responses, 2),
        Some(NetworkReturnCode::CmpFail)
    );
}

// ============================================================================
// Scenario C: atomic-add overflow
// ============================================================================

#[test]
fn atomic_add_overflow_leaves_value_untouched() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let head = vsi(11);
    let tail = vsi(31);

    cluster.client_atomic(head, 1, b"k1", put_v(i64::MAX - 2));
    cluster.client_atomic(
        head,
        2,
        b"k1",
        KeyChange {
            funcs: vec![Funcall::new(1, FuncKind::NumAdd, Value::Int(10))],
            ..KeyChange::default()
        },
    );
    cluster.client_get(tail, 3, b"k1");

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 2),
        Some(NetworkReturnCode::Overflow)
    );
    let (status, value) = cluster.get_result(&responses, 3).unwrap();
    assert_eq!(status, NetworkReturnCode::Success);
    assert_eq!(value, Some(int_tuple(&kv_schema(), i64::MAX - 2)));
}

// ============================================================================
// Scenario D: subspace transfer
// ============================================================================

fn uvw_schema() -> Schema {
    Schema::new(
        "kv",
        vec![
            Attribute::new("u", AttrType::STRING),
            Attribute::new("v", AttrType::INT64),
            Attribute::new("w", AttrType::STRING),
        ],
    )
}

/// Two subspaces: the key subspace (single region, chain [11]) and a
/// second subspace hashed on `w`, split into two regions so that the
/// values `w_low` and `w_high` land on different chains ([21] and [31]).
fn transfer_config(epoch: u64, w_low: &str, w_high: &str) -> (Configuration, RegionId, RegionId) {
    let schema = uvw_schema();
    let key = Bytes::from_static(b"k");
    let hash_of = |w: &str| {
        let tuple =
            PackedTuple::encode(&schema, &[Value::Int(0), Value::str(w)]).unwrap();
        hash_tuple(&schema, &key, &tuple).unwrap()[2]
    };
    let (low, high) = (hash_of(w_low), hash_of(w_high));
    assert_ne!(low, high, "pick attribute values with distinct hashes");
    let split = low.min(high);
    let (low_region, high_region) = if low < high {
        (RegionId::new(2), RegionId::new(3))
    } else {
        (RegionId::new(3), RegionId::new(2))
    };

    let spaces = vec![SpaceConfig {
        id: SpaceId::new(1),
        schema,
        subspaces: vec![
            SubspaceConfig {
                id: SubspaceId::new(1),
                attrs: vec![0],
                regions: vec![RegionConfig {
                    id: RegionId::new(1),
                    lower: vec![0],
                    upper: vec![u64::MAX],
                    replicas: vec![vsi(11)],
                }],
            },
            SubspaceConfig {
                id: SubspaceId::new(2),
                attrs: vec![2],
                regions: vec![
                    RegionConfig {
                        id: RegionId::new(2),
                        lower: vec![0],
                        upper: vec![split],
                        replicas: vec![vsi(21)],
                    },
                    RegionConfig {
                        id: RegionId::new(3),
                        lower: vec![split + 1],
                        upper: vec![u64::MAX],
                        replicas: vec![vsi(31)],
                    },
                ],
            },
        ],
    }];
    let mut assignments = HashMap::new();

    for id in [11, 21, 31] {
        assignments.insert(vsi(id), ServerId::new(id / 10));
    }

    let config = Configuration::new(ConfigEpoch::new(epoch), spaces, assignments).unwrap();
    (config, low_region, high_region)
}

fn set_vw(v: i64, w: &str) -> KeyChange {
    KeyChange {
        funcs: vec![
            Funcall::new(1, FuncKind::Set, Value::Int(v)),
            Funcall::new(2, FuncKind::Set, Value::str(w)),
        ],
        ..KeyChange::default()
    }
}

fn set_w(w: &str) -> KeyChange {
    KeyChange {
        funcs: vec![Funcall::new(2, FuncKind::Set, Value::str(w))],
        ..KeyChange::default()
    }
}

#[test]
fn subspace_transfer_moves_the_object() {
    let (config, region_a, region_b) = transfer_config(1, "A", "B");
    let cluster = TestCluster::new(config);
    let head = vsi(11);
    let server_of = |region: RegionId| {
        let vsi = cluster.config().head_of_region(region);
        cluster.config().server_of(vsi).unwrap()
    };

    cluster.client_atomic(head, 1, b"k", set_vw(1, "A"));
    cluster.client_atomic(head, 2, b"k", set_w("B"));

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.atomic_status(&responses, 2),
        Some(NetworkReturnCode::Success)
    );

    let schema = uvw_schema();
    let expect_b =
        PackedTuple::encode(&schema, &[Value::Int(1), Value::str("B")]).unwrap();

    // The donor region holds no record of the key; the recipient holds
    // the new tuple at the same version the key subspace committed.
    assert_eq!(cluster.stored(server_of(region_a), region_a, b"k"), None);
    assert_eq!(cluster.data[&server_of(region_a)].region_len(region_a), 0);
    assert_eq!(
        cluster.stored(server_of(region_b), region_b, b"k"),
        Some((expect_b.clone(), Version::new(2)))
    );
    assert_eq!(
        cluster.stored(ServerId::new(1), RegionId::new(1), b"k"),
        Some((expect_b, Version::new(2)))
    );
}

#[test]
fn subspace_transfer_paths_converge_under_duplication() {
    let run = |duplicate: bool| {
        let (config, region_a, region_b) = transfer_config(1, "A", "B");
        let cluster = TestCluster::new(config);
        cluster.net.set_duplicate_all(duplicate);

        cluster.client_atomic(vsi(11), 1, b"k", set_vw(1, "A"));
        cluster.client_atomic(vsi(11), 2, b"k", set_w("B"));

        let responses = cluster.net.take_client_responses();
        assert_eq!(
            cluster.atomic_status(&responses, 2),
            Some(NetworkReturnCode::Success)
        );

        let b_server = cluster
            .config()
            .server_of(cluster.config().head_of_region(region_b))
            .unwrap();
        let a_server = cluster
            .config()
            .server_of(cluster.config().head_of_region(region_a))
            .unwrap();
        (
            cluster.stored(a_server, region_a, b"k"),
            cluster.stored(b_server, region_b, b"k"),
        )
    };

    // Delivering every chain message twice must converge to the same
    // state as delivering each exactly once.
    assert_eq!(run(false), run(true));
}

// ============================================================================
// Scenario E: replica failure and catch-up
// ============================================================================

#[test]
fn partitioned_middle_replica_catches_up_after_reconfiguration() {
    let mut cluster = TestCluster::new(chain_config(1, 3));
    let head = vsi(11);
    let middle_server = ServerId::new(2);

    for (nonce, v) in [(1, 10), (2, 20), (3, 30)] {
        cluster.client_atomic(head, nonce, b"k1", put_v(v));
    }

    let responses = cluster.net.take_client_responses();

    for nonce in 1..=3 {
        assert_eq!(
            cluster.atomic_status(&responses, nonce),
            Some(NetworkReturnCode::Success)
        );
    }

    // The middle replica goes dark; new writes stall at the head.
    cluster.net.partition(middle_server);

    for (nonce, v) in [(4, 40), (5, 50), (6, 60)] {
        cluster.client_atomic(head, nonce, b"k1", put_v(v));
    }

    let responses = cluster.net.take_client_responses();

    for nonce in 4..=6 {
        assert_eq!(cluster.atomic_status(&responses, nonce), None);
    }

    assert_eq!(
        cluster.stored(ServerId::new(3), RegionId::new(1), b"k1"),
        Some((int_tuple(&kv_schema(), 30), Version::new(3))),
        "the tail must not advance past the partition"
    );

    // The replica comes back; the coordinator issues a new epoch and
    // the retransmitter repairs the chain.
    cluster.net.heal(middle_server);
    cluster.reconfigure(chain_config(2, 3));
    cluster.retransmit_all();

    let responses = cluster.net.take_client_responses();

    for nonce in 4..=6 {
        assert_eq!(
            cluster.atomic_status(&responses, nonce),
            Some(NetworkReturnCode::Success)
        );
    }

    for server in [1, 2, 3] {
        assert_eq!(
            cluster.stored(ServerId::new(server), RegionId::new(1), b"k1"),
            Some((int_tuple(&kv_schema(), 60), Version::new(6))),
            "server {server} must catch up to version 6"
        );
    }
}

// ============================================================================
// Scenario F: read-only stabilization
// ============================================================================

#[test]
fn read_only_quiesces_and_resumes() {
    let cluster = TestCluster::new(chain_config(1, 2));
    let head = vsi(11);
    let head_manager = &cluster.managers[&ServerId::new(1)];

    // Writes in flight when the checkpoint begins: enqueued but not yet
    // pumped through the chain.
    for (nonce, v) in [(1, 10), (2, 20)] {
        head_manager.client_atomic(
            crate::testing::CLIENT,
            head,
            nonce,
            Bytes::from_static(b"k1"),
            put_v(v),
        );
    }

    for manager in cluster.managers.values() {
        manager.begin_checkpoint(7);
    }

    // New atomics are refused while the chain keeps draining.
    cluster.client_atomic(head, 3, b"k1", put_v(30));
    cluster.pump();

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.atomic_status(&responses, 2),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.atomic_status(&responses, 3),
        Some(NetworkReturnCode::ReadOnly)
    );

    // Every manager reports stable for checkpoint 7.
    for manager in cluster.managers.values() {
        manager.check_stable();
    }

    let reports = cluster.coordinator.stable_reports();
    assert!(
        reports.iter().filter(|seq| **seq == 7).count() >= 2,
        "both replicas report stability: {reports:?}"
    );

    // Revoking read-only resumes writes without data loss.
    for manager in cluster.managers.values() {
        manager.end_checkpoint(7);
    }

    cluster.client_atomic(head, 4, b"k1", put_v(40));
    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 4),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.stored(ServerId::new(2), RegionId::new(1), b"k1"),
        Some((int_tuple(&kv_schema(), 40), Version::new(3)))
    );
}

// ============================================================================
// Idempotence and ordering properties
// ============================================================================

#[test]
fn duplicated_chain_traffic_is_idempotent() {
    let cluster = TestCluster::new(chain_config(1, 2));
    cluster.net.set_duplicate_all(true);

    cluster.client_atomic(vsi(11), 1, b"k1", put_v(7));
    cluster.client_atomic(vsi(11), 2, b"k1", put_v(8));

    let responses = cluster.net.take_client_responses();
    let successes = responses
        .iter()
        .filter(|(_, m)| {
            matches!(
                m,
                hyperspace_wire::Message::RespAtomic {
                    status: NetworkReturnCode::Success,
                    ..
                }
            )
        })
        .count();
    assert_eq!(successes, 2, "exactly one response per atomic");

    for server in [1, 2] {
        assert_eq!(
            cluster.stored(ServerId::new(server), RegionId::new(1), b"k1"),
            Some((int_tuple(&kv_schema(), 8), Version::new(2)))
        );
    }
}

#[test]
fn interleaved_writes_commit_in_version_order() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let head_manager = &cluster.managers[&ServerId::new(1)];

    // Enqueue a burst without pumping; versions are assigned in arrival
    // order and must commit densely.
    for nonce in 1..=20u64 {
        head_manager.client_atomic(
            crate::testing::CLIENT,
            vsi(11),
            nonce,
            Bytes::from_static(b"k1"),
            put_v(nonce as i64),
        );
    }

    cluster.pump();

    let responses = cluster.net.take_client_responses();

    for nonce in 1..=20u64 {
        assert_eq!(
            cluster.atomic_status(&responses, nonce),
            Some(NetworkReturnCode::Success)
        );
    }

    for server in [1, 2, 3] {
        assert_eq!(
            cluster.stored(ServerId::new(server), RegionId::new(1), b"k1"),
            Some((int_tuple(&kv_schema(), 20), Version::new(20)))
        );
    }
}

#[test]
fn deletes_and_fresh_inserts_act_as_barriers() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let head_manager = &cluster.managers[&ServerId::new(1)];

    // A put, a delete, and a re-insert land before any chain traffic is
    // delivered. The delete must drain the committable queue before it
    // is issued, and the re-insert (fresh again) must wait behind the
    // delete.
    for (nonce, change) in [
        (1, put_v(7)),
        (2, erase()),
        (3, put_v(8)),
    ] {
        head_manager.client_atomic(
            crate::testing::CLIENT,
            vsi(11),
            nonce,
            Bytes::from_static(b"k1"),
            change,
        );
    }

    cluster.pump();

    let responses = cluster.net.take_client_responses();

    for nonce in 1..=3u64 {
        assert_eq!(
            cluster.atomic_status(&responses, nonce),
            Some(NetworkReturnCode::Success)
        );
    }

    for server in [1, 2, 3] {
        assert_eq!(
            cluster.stored(ServerId::new(server), RegionId::new(1), b"k1"),
            Some((int_tuple(&kv_schema(), 8), Version::new(3)))
        );
    }
}

#[test]
fn storage_failure_wedges_until_reconfiguration() {
    let mut cluster = TestCluster::new(chain_config(1, 2));
    let tail_data = &cluster.data[&ServerId::new(2)];

    tail_data.set_fail_writes(true);
    cluster.client_atomic(vsi(11), 1, b"k1", put_v(7));

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        None,
        "a wedged tail must not acknowledge"
    );

    cluster.data[&ServerId::new(2)].set_fail_writes(false);
    cluster.reconfigure(chain_config(2, 2));
    cluster.retransmit_all();

    let responses = cluster.net.take_client_responses();
    assert_eq!(
        cluster.atomic_status(&responses, 1),
        Some(NetworkReturnCode::Success)
    );
    assert_eq!(
        cluster.stored(ServerId::new(2), RegionId::new(1), b"k1"),
        Some((int_tuple(&kv_schema(), 7), Version::new(1)))
    );
}

#[test]
fn abandoned_sequence_ids_are_reclaimed() {
    let cluster = TestCluster::new(chain_config(1, 1));
    let manager = &cluster.managers[&ServerId::new(1)];
    let region = RegionId::new(1);

    let a = manager.generate_seq_id(region);
    let b = manager.generate_seq_id(region);
    let c = manager.generate_seq_id(region);
    assert_eq!((a.as_u64(), b.as_u64(), c.as_u64()), (1, 2, 3));

    manager.collect_seq_id(region, b);
    assert_eq!(manager.reclaimable_below(region), 1);

    // Ids 1 and 3 were consumed by operations that will never commit;
    // the repair pass closes the gaps.
    manager.retransmit_cycle();
    assert_eq!(manager.reclaimable_below(region), 4);
}

#[test]
fn out_of_order_chain_ops_wait_for_their_ancestor() {
    let cluster = TestCluster::new(chain_config(1, 2));
    let tail_manager = &cluster.managers[&ServerId::new(2)];
    let epoch = ConfigEpoch::new(1);

    // Version 2 arrives before version 1; it must defer, not commit.
    tail_manager.chain_op(
        vsi(11),
        vsi(21),
        epoch,
        Version::new(1),
        Version::new(2),
        false,
        true,
        Bytes::from_static(b"k1"),
        int_tuple(&kv_schema(), 2),
    );
    cluster.pump();
    assert_eq!(
        cluster.stored(ServerId::new(2), RegionId::new(1), b"k1"),
        None
    );

    tail_manager.chain_op(
        vsi(11),
        vsi(21),
        epoch,
        Version::ZERO,
        Version::new(1),
        true,
        true,
        Bytes::from_static(b"k1"),
        int_tuple(&kv_schema(), 1),
    );
    cluster.pump();

    // Both versions commit once the ancestor lands, in order.
    assert_eq!(
        cluster.stored(ServerId::new(2), RegionId::new(1), b"k1"),
        Some((int_tuple(&kv_schema(), 2), Version::new(2)))
    );
}

#[test]
fn chain_ops_from_the_wrong_sender_are_dropped() {
    let cluster = TestCluster::new(chain_config(1, 3));
    let tail_manager = &cluster.managers[&ServerId::new(3)];

    // The tail's predecessor is vsi(21); a message claiming to come from
    // the head fails the sender check and is discarded.
    tail_manager.chain_op(
        vsi(11),
        vsi(31),
        ConfigEpoch::new(1),
        Version::ZERO,
        Version::new(1),
        true,
        true,
        Bytes::from_static(b"k1"),
        int_tuple(&kv_schema(), 1),
    );
    cluster.pump();

    assert_eq!(
        cluster.stored(ServerId::new(3), RegionId::new(1), b"k1"),
        None
    );
}

#[test]
fn retransmitter_thread_repairs_in_the_background() {
    let mut cluster = TestCluster::new(chain_config(1, 2));
    let tail_server = ServerId::new(2);

    cluster.net.partition(tail_server);
    cluster.client_atomic(vsi(11), 1, b"k1", put_v(7));
    assert_eq!(cluster.net.take_client_responses().len(), 0);

    cluster.net.heal(tail_server);
    cluster.reconfigure(chain_config(2, 2));

    let head_manager = Arc::clone(&cluster.managers[&ServerId::new(1)]);
    let retransmitter =
        crate::Retransmitter::spawn(head_manager, std::time::Duration::from_millis(10));
    retransmitter.kick();

    // The repair pass runs on the background thread; wait for the
    // re-emitted op to appear, then drive the rest of the chain.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);

    loop {
        cluster.pump();
        let responses = cluster.net.take_client_responses();

        if cluster.atomic_status(&responses, 1) == Some(NetworkReturnCode::Success) {
            break;
        }

        assert!(
            std::time::Instant::now() < deadline,
            "retransmitter failed to repair within five seconds"
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    retransmitter.shutdown();
    assert_eq!(
        cluster.stored(tail_server, RegionId::new(1), b"k1"),
        Some((int_tuple(&kv_schema(), 7), Version::new(1)))
    );
}

#[test]
fn stale_epoch_chain_traffic_gets_config_mismatch() {
    let cluster = TestCluster::new(chain_config(1, 2));
    let tail_manager = &cluster.managers[&ServerId::new(2)];

    // A chain op stamped with a bygone epoch is refused outright.
    tail_manager.chain_op(
        vsi(11),
        vsi(21),
        ConfigEpoch::new(0),
        Version::ZERO,
        Version::new(1),
        true,
        true,
        Bytes::from_static(b"k1"),
        int_tuple(&kv_schema(), 1),
    );
    cluster.pump();

    assert_eq!(
        cluster.stored(ServerId::new(2), RegionId::new(1), b"k1"),
        None,
        "nothing may commit off a stale epoch"
    );
    assert_eq!(tail_manager.resident_key_states(), 0);
}
