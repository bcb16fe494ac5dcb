//! 服务发现模块
//!
//! 将服务条目按集群分组并构建拓扑快照，由发现器周期性推送给调度器

pub mod static_source;

use crate::topology::{Cluster, ClusterMap, ProbeableEndpoint};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

pub use static_source::{EntrySource, StaticDiscoverer};

/// 一个被发现的服务实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceEntry {
    /// 服务名称
    pub service: String,
    /// 实例地址
    pub address: String,
    /// 实例端口
    pub port: u16,
    /// 标签
    #[serde(default)]
    pub tags: Vec<String>,
    /// 元数据
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl ServiceEntry {
    /// `address:port` 形式的地址
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 按元数据中的集群名称将服务条目分组
///
/// 缺少集群键的条目会被跳过并记录警告。
pub fn group_nodes_by_cluster(
    meta_cluster_key: &str,
    entries: &[ServiceEntry],
) -> BTreeMap<String, Vec<ServiceEntry>> {
    let mut clusters: BTreeMap<String, Vec<ServiceEntry>> = BTreeMap::new();

    for entry in entries {
        match entry.meta.get(meta_cluster_key) {
            Some(cluster_name) => clusters
                .entry(cluster_name.clone())
                .or_default()
                .push(entry.clone()),
            None => warn!(
                "跳过 {} (属于 {})，缺少集群键: {}",
                entry.address, entry.service, meta_cluster_key
            ),
        }
    }

    clusters
}

/// 集群级端点工厂：集群名称和该集群的所有条目
pub type ClusterEndpointFn = Arc<
    dyn Fn(&str, &[ServiceEntry]) -> anyhow::Result<Box<dyn ProbeableEndpoint>> + Send + Sync,
>;

/// 节点级端点工厂：集群名称和单个条目
pub type NodeEndpointFn =
    Arc<dyn Fn(&str, &ServiceEntry) -> anyhow::Result<Box<dyn ProbeableEndpoint>> + Send + Sync>;

/// 通用拓扑构建器
#[derive(Clone)]
pub struct TopologyBuilder {
    meta_cluster_key: String,
    cluster_fn: ClusterEndpointFn,
    node_fn: NodeEndpointFn,
}

impl TopologyBuilder {
    /// 创建拓扑构建器
    ///
    /// # 参数
    /// * `meta_cluster_key` - 元数据中表示集群名称的键
    /// * `cluster_fn` - 集群级端点工厂
    /// * `node_fn` - 节点级端点工厂
    pub fn new<C, N>(meta_cluster_key: impl Into<String>, cluster_fn: C, node_fn: N) -> Self
    where
        C: Fn(&str, &[ServiceEntry]) -> anyhow::Result<Box<dyn ProbeableEndpoint>>
            + Send
            + Sync
            + 'static,
        N: Fn(&str, &ServiceEntry) -> anyhow::Result<Box<dyn ProbeableEndpoint>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            meta_cluster_key: meta_cluster_key.into(),
            cluster_fn: Arc::new(cluster_fn),
            node_fn: Arc::new(node_fn),
        }
    }

    /// 元数据中表示集群名称的键
    pub fn meta_cluster_key(&self) -> &str {
        &self.meta_cluster_key
    }

    /// 从服务条目构建完整的拓扑快照，任意端点创建失败则整个构建失败
    pub fn build(&self, entries: &[ServiceEntry]) -> anyhow::Result<ClusterMap> {
        let mut cluster_map = ClusterMap::new();

        for (cluster_name, entries) in group_nodes_by_cluster(&self.meta_cluster_key, entries) {
            let cluster_endpoint = (self.cluster_fn)(&cluster_name, &entries)
                .with_context(|| format!("创建集群 {} 的端点失败", cluster_name))?;

            let mut cluster = Cluster::new(cluster_endpoint);
            for entry in &entries {
                let node_endpoint = (self.node_fn)(&cluster_name, entry).with_context(|| {
                    format!("创建节点 {} 的端点失败", entry.socket_addr())
                })?;
                cluster.add_endpoint(node_endpoint);
            }
            cluster_map.append_cluster(cluster);
        }

        Ok(cluster_map)
    }
}

impl std::fmt::Debug for TopologyBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyBuilder")
            .field("meta_cluster_key", &self.meta_cluster_key)
            .finish_non_exhaustive()
    }
}
