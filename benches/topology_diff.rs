//! 拓扑比较基准测试
//!
//! 测试不同规模拓扑之间的差异计算性能

use blackbox_prober::topology::{Cluster, ClusterMap, DummyEndpoint};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

/// 构建包含 `clusters` 个集群、每个集群 `nodes` 个节点的拓扑
///
/// `offset` 用于让节点哈希错开，模拟节点替换。
fn build_topology(clusters: usize, nodes: usize, offset: usize) -> ClusterMap {
    let mut map = ClusterMap::new();
    for c in 0..clusters {
        let cluster_name = format!("cluster-{}", c);
        let mut cluster = Cluster::new(Box::new(DummyEndpoint::cluster(
            cluster_name.clone(),
            cluster_name.clone(),
        )));
        for n in offset..offset + nodes {
            let name = format!("10.0.{}.{}:11211", c, n);
            cluster.add_endpoint(Box::new(DummyEndpoint::new(
                name.clone(),
                format!("{}/{}", cluster_name, name),
            )));
        }
        map.append_cluster(cluster);
    }
    map
}

/// 拓扑比较基准测试
fn topology_diff_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology_diff");

    for &(clusters, nodes) in &[(10, 10), (50, 20), (200, 50)] {
        let old = build_topology(clusters, nodes, 0);
        let unchanged = build_topology(clusters, nodes, 0);
        // 每个集群替换一个节点
        let shifted = build_topology(clusters, nodes, 1);

        let label = format!("{}x{}", clusters, nodes);
        group.bench_with_input(BenchmarkId::new("unchanged", &label), &unchanged, |b, new| {
            b.iter(|| black_box(old.diff(black_box(new))))
        });
        group.bench_with_input(BenchmarkId::new("node_replaced", &label), &shifted, |b, new| {
            b.iter(|| black_box(old.diff(black_box(new))))
        });
    }

    group.finish();
}

criterion_group!(benches, topology_diff_benchmark);
criterion_main!(benches);
