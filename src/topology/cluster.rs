//! 集群拓扑快照
//!
//! [`ClusterMap`] 表示某一时刻完整的期望端点集合，[`ClusterMap::diff`] 计算两个快照之间的差异。

use super::endpoint::ProbeableEndpoint;
use std::collections::{HashMap, HashSet};

/// 一个集群：一个集群级端点加上属于它的节点端点
#[derive(Debug, Clone)]
pub struct Cluster {
    /// 集群级端点
    pub cluster_endpoint: Box<dyn ProbeableEndpoint>,
    /// 节点端点，按哈希索引
    pub node_endpoints: HashMap<String, Box<dyn ProbeableEndpoint>>,
}

impl Cluster {
    /// 以集群级端点创建一个不含节点的集群
    pub fn new(cluster_endpoint: Box<dyn ProbeableEndpoint>) -> Self {
        Self {
            cluster_endpoint,
            node_endpoints: HashMap::new(),
        }
    }

    /// 添加节点端点，相同哈希的端点会被替换
    pub fn add_endpoint(&mut self, endpoint: Box<dyn ProbeableEndpoint>) {
        self.node_endpoints.insert(endpoint.hash_key(), endpoint);
    }

    /// 集群级端点的哈希
    pub fn hash_key(&self) -> String {
        self.cluster_endpoint.hash_key()
    }

    /// 集群中所有端点（集群端点在前）
    pub fn all_endpoints(&self) -> impl Iterator<Item = &Box<dyn ProbeableEndpoint>> {
        std::iter::once(&self.cluster_endpoint).chain(self.node_endpoints.values())
    }
}

/// 完整的集群拓扑快照，按集群端点哈希索引
#[derive(Debug, Clone, Default)]
pub struct ClusterMap {
    /// 集群映射
    pub clusters: HashMap<String, Cluster>,
}

impl ClusterMap {
    /// 创建空的拓扑
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加集群，以集群端点哈希为键
    pub fn append_cluster(&mut self, cluster: Cluster) {
        self.clusters.insert(cluster.hash_key(), cluster);
    }

    /// 拓扑中是否没有任何集群
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// 拓扑中端点总数（集群端点和节点端点）
    pub fn endpoint_count(&self) -> usize {
        self.clusters
            .values()
            .map(|c| 1 + c.node_endpoints.len())
            .sum()
    }

    /// 拓扑中所有端点的哈希
    pub fn endpoint_hashes(&self) -> HashSet<String> {
        self.clusters
            .values()
            .flat_map(|c| c.all_endpoints().map(|e| e.hash_key()))
            .collect()
    }

    /// 比较当前拓扑（旧）与新拓扑
    ///
    /// 返回 `(to_stop, to_start)`：
    /// * `to_stop` - 存在于旧拓扑但不在新拓扑中的端点
    /// * `to_start` - 存在于新拓扑但不在旧拓扑中的端点
    ///
    /// 两边都存在的集群只比较节点集合，集群端点本身不会被重启。
    /// 返回的端点是快照中实例的副本。
    pub fn diff(
        &self,
        new: &ClusterMap,
    ) -> (Vec<Box<dyn ProbeableEndpoint>>, Vec<Box<dyn ProbeableEndpoint>>) {
        let mut to_stop = Vec::new();
        let mut to_start = Vec::new();

        for (cluster_hash, old_cluster) in &self.clusters {
            match new.clusters.get(cluster_hash) {
                Some(new_cluster) => {
                    to_stop.extend(
                        old_cluster
                            .node_endpoints
                            .iter()
                            .filter(|(hash, _)| !new_cluster.node_endpoints.contains_key(*hash))
                            .map(|(_, e)| e.clone()),
                    );
                    to_start.extend(
                        new_cluster
                            .node_endpoints
                            .iter()
                            .filter(|(hash, _)| !old_cluster.node_endpoints.contains_key(*hash))
                            .map(|(_, e)| e.clone()),
                    );
                }
                // 集群消失，它的所有端点都需要停止
                None => to_stop.extend(old_cluster.all_endpoints().cloned()),
            }
        }

        for (cluster_hash, new_cluster) in &new.clusters {
            if !self.clusters.contains_key(cluster_hash) {
                to_start.extend(new_cluster.all_endpoints().cloned());
            }
        }

        (to_stop, to_start)
    }
}
