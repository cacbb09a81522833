//! Benchmark for raid group membership and delta computation
//!
//! Pools with many wide groups, desired groups overlapping at the tail.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pool_topology_operator::crd::{
    BlockDeviceRef, PoolRaidGroup, RaidGroupSpec, RaidType, StoragePool, StoragePoolSpec,
};
use pool_topology_operator::expansion::{added_devices, is_raid_group_present, matching_group};

fn devices(prefix: &str, count: usize) -> Vec<BlockDeviceRef> {
    (0..count)
        .map(|i| BlockDeviceRef::new(format!("{}-{:05}", prefix, i)))
        .collect()
}

fn pool(groups: usize, width: usize) -> StoragePool {
    StoragePool::new(
        "pool-bench",
        StoragePoolSpec {
            node_name: "node-1".into(),
            raid_groups: (0..groups)
                .map(|g| PoolRaidGroup {
                    name: None,
                    raid_type: RaidType::Striped,
                    block_devices: devices(&format!("g{}", g), width),
                })
                .collect(),
            ..Default::default()
        },
    )
}

/// Desired version of the last group with `extra` devices appended
fn desired_last(groups: usize, width: usize, extra: usize) -> RaidGroupSpec {
    let mut block_devices = devices(&format!("g{}", groups - 1), width);
    block_devices.extend(devices("new", extra));
    RaidGroupSpec {
        name: None,
        raid_type: Some(RaidType::Striped),
        block_devices,
    }
}

fn bench_presence(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_delta");

    for width in [16usize, 128, 1024] {
        let pool = pool(16, width);
        let absent = RaidGroupSpec {
            block_devices: devices("absent", width),
            ..Default::default()
        };
        group.throughput(Throughput::Elements((16 * width) as u64));
        group.bench_with_input(BenchmarkId::new("present_miss", width), &width, |b, _| {
            b.iter(|| is_raid_group_present(black_box(&absent), black_box(&pool)));
        });
    }

    group.finish();
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_delta");

    for width in [16usize, 128, 1024] {
        let pool = pool(16, width);
        let desired = desired_last(16, width, width / 4);
        group.throughput(Throughput::Elements(desired.block_devices.len() as u64));
        group.bench_with_input(BenchmarkId::new("match_and_delta", width), &width, |b, _| {
            b.iter(|| {
                let pos = matching_group(black_box(&desired), 15, &pool);
                pos.map(|p| added_devices(&desired, &pool.spec.raid_groups[p]))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_presence, bench_delta);
criterion_main!(benches);
