//! Replication throughput benchmarks.
//!
//! Drives an in-process cluster (loopback transport, in-memory
//! datalayers) through the client surface to establish baselines for
//! chain commit latency at different chain lengths and key spreads.

use std::collections::HashMap;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use hyperspace_config::{Configuration, RegionConfig, SpaceConfig, SubspaceConfig};
use hyperspace_data::{AttrType, Attribute, FuncKind, Funcall, Schema, Value};
use hyperspace_replication::KeyChange;
use hyperspace_replication::testing::TestCluster;
use hyperspace_types::{ConfigEpoch, RegionId, ServerId, SpaceId, SubspaceId, VirtualServerId};

fn chain_config(links: u64) -> Configuration {
    let replicas: Vec<VirtualServerId> =
        (1..=links).map(|i| VirtualServerId::new(i * 10 + 1)).collect();
    let mut assignments = HashMap::new();

    for replica in &replicas {
        assignments.insert(*replica, ServerId::new(u64::from(*replica) / 10));
    }

    let schema = Schema::new(
        "bench",
        vec![
            Attribute::new("u", AttrType::STRING),
            Attribute::new("v", AttrType::INT64),
        ],
    );
    let spaces = vec![SpaceConfig {
        id: SpaceId::new(1),
        schema,
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
    Configuration::new(ConfigEpoch::new(1), spaces, assignments).unwrap()
}

fn put_v(v: i64) -> KeyChange {
    KeyChange {
        funcs: vec![Funcall::new(1, FuncKind::Set, Value::Int(v))],
        ..KeyChange::default()
    }
}

// ============================================================================
// Chain commit benchmarks
// ============================================================================

fn bench_single_key_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_key_commit");
    group.throughput(Throughput::Elements(1));

    for links in [1u64, 3, 5] {
        group.bench_with_input(BenchmarkId::from_parameter(links), &links, |b, links| {
            let cluster = TestCluster::new(chain_config(*links));
            let head = VirtualServerId::new(11);
            let mut nonce = 0u64;

            b.iter(|| {
                nonce += 1;
                cluster.client_atomic(head, nonce, b"bench-key", put_v(nonce as i64));
                black_box(cluster.net.take_client_responses());
            });
        });
    }

    group.finish();
}

fn bench_spread_keys_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("spread_keys_commit");
    group.throughput(Throughput::Elements(1));

    for keys in [16u64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(keys), &keys, |b, keys| {
            let cluster = TestCluster::new(chain_config(3));
            let head = VirtualServerId::new(11);
            let mut nonce = 0u64;

            b.iter(|| {
                nonce += 1;
                let key = format!("bench-key-{}", nonce % keys);
                cluster.client_atomic(head, nonce, key.as_bytes(), put_v(nonce as i64));
                black_box(cluster.net.take_client_responses());
            });
        });
    }

    group.finish();
}

fn bench_read_at_tail(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_at_tail");
    group.throughput(Throughput::Elements(1));

    group.bench_function("chain_of_3", |b| {
        let cluster = TestCluster::new(chain_config(3));
        cluster.client_atomic(VirtualServerId::new(11), 1, b"bench-key", put_v(7));
        let _ = cluster.net.take_client_responses();
        let tail = VirtualServerId::new(31);
        let mut nonce = 1u64;

        b.iter(|| {
            nonce += 1;
            cluster.client_get(tail, nonce, b"bench-key");
            black_box(cluster.net.take_client_responses());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_key_commit,
    bench_spread_keys_commit,
    bench_read_at_tail
);
criterion_main!(benches);
