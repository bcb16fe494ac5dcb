//! TCP探测
//!
//! 节点级的延迟检查测量一次TCP连接的耗时；集群级的可用性检查要求至少一个节点可以连接。

use crate::config::{CheckConfig, Config};
use crate::discovery::{ServiceEntry, TopologyBuilder};
use crate::metrics::MetricsCollector;
use crate::scheduler::{Check, ProbingScheduler};
use crate::topology::{downcast_endpoint, ProbeableEndpoint};
use anyhow::{bail, Context};
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 节点延迟检查名称
pub const LATENCY_CHECK: &str = "latency_check";
/// 集群可用性检查名称
pub const AVAILABILITY_CHECK: &str = "availability_check";

/// 各集群最新发现的成员地址
///
/// 拓扑构建器每次构建时更新，运行中的集群端点在刷新时读取，
/// 这样成员变化不需要重启集群端点。
#[derive(Debug, Clone, Default)]
pub struct ClusterMembers {
    inner: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl ClusterMembers {
    /// 记录集群的成员地址
    pub fn update(&self, cluster_name: &str, servers: Vec<String>) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(cluster_name.to_string(), servers);
    }

    /// 集群的成员地址
    pub fn get(&self, cluster_name: &str) -> Option<Vec<String>> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(cluster_name)
            .cloned()
    }
}

/// 排序去重后的 `address:port` 列表
fn sorted_servers(entries: &[ServiceEntry]) -> Vec<String> {
    let mut servers: Vec<String> = entries.iter().map(ServiceEntry::socket_addr).collect();
    servers.sort();
    servers.dedup();
    servers
}

/// 通过TCP连接探测的端点
#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    /// 端点名称（节点为 `address:port`，集群为集群名称）
    pub name: String,
    /// 所属集群名称
    pub cluster_name: String,
    /// 是否为集群级端点
    pub cluster_level: bool,
    /// `address:port` 形式的目标地址
    pub servers: Vec<String>,
    /// 连接超时
    pub connect_timeout: Duration,
    /// 已解析的地址，连接前为空
    resolved: Vec<SocketAddr>,
    /// 集群成员来源，只有集群级端点会设置
    members: Option<ClusterMembers>,
}

impl TcpEndpoint {
    /// 从单个服务条目创建节点级端点
    pub fn node(cluster_name: &str, entry: &ServiceEntry, connect_timeout: Duration) -> Self {
        let name = entry.socket_addr();
        Self {
            servers: vec![name.clone()],
            name,
            cluster_name: cluster_name.to_string(),
            cluster_level: false,
            connect_timeout,
            resolved: Vec::new(),
            members: None,
        }
    }

    /// 从集群的所有服务条目创建集群级端点
    pub fn cluster(cluster_name: &str, entries: &[ServiceEntry], connect_timeout: Duration) -> Self {
        Self {
            name: cluster_name.to_string(),
            cluster_name: cluster_name.to_string(),
            cluster_level: true,
            servers: sorted_servers(entries),
            connect_timeout,
            resolved: Vec::new(),
            members: None,
        }
    }

    /// 刷新时从 `members` 读取最新的成员地址
    pub fn with_members(mut self, members: ClusterMembers) -> Self {
        self.members = Some(members);
        self
    }

    /// 已解析的地址
    pub fn resolved(&self) -> &[SocketAddr] {
        &self.resolved
    }

    /// 解析所有目标地址，部分失败只记录警告
    async fn resolve(&self) -> anyhow::Result<Vec<SocketAddr>> {
        let mut resolved = Vec::new();
        for server in &self.servers {
            match lookup_host(server.as_str()).await {
                Ok(addrs) => resolved.extend(addrs),
                Err(e) => warn!("解析地址 {} 失败: {}", server, e),
            }
        }

        if resolved.is_empty() {
            bail!("无法解析 {} 的任何地址: {:?}", self.name, self.servers);
        }
        Ok(resolved)
    }

    /// 在超时时间内建立一次TCP连接
    async fn connect_once(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .with_context(|| format!("连接 {} 超时", addr))?
            .with_context(|| format!("连接 {} 失败", addr))?;
        drop(stream);
        Ok(())
    }
}

#[async_trait]
impl ProbeableEndpoint for TcpEndpoint {
    fn hash_key(&self) -> String {
        format!("{}/{}", self.cluster_name, self.name)
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_cluster(&self) -> bool {
        self.cluster_level
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        self.resolved = self.resolve().await?;
        debug!("{} 解析到 {} 个地址", self.name, self.resolved.len());
        Ok(())
    }

    async fn refresh(&mut self) -> anyhow::Result<()> {
        if let Some(servers) = self.members.as_ref().and_then(|m| m.get(&self.cluster_name)) {
            if servers != self.servers {
                info!(
                    "集群 {} 成员变化: {:?} -> {:?}",
                    self.cluster_name, self.servers, servers
                );
                self.servers = servers;
            }
        }
        // 解析失败时保留上一次的结果
        self.resolved = self.resolve().await?;
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.resolved.clear();
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ProbeableEndpoint> {
        Box::new(self.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 计时执行一次操作，记录延迟和失败次数
async fn observe_op<F>(
    metrics: &MetricsCollector,
    labels: [&str; 3],
    op: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    let start = Instant::now();
    let result = op.await;
    metrics.observe_op_latency(
        labels[0],
        labels[1],
        labels[2],
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );
    result
}

/// 节点延迟检查：对第一个已解析地址计时建立TCP连接
pub fn latency_check(metrics: Arc<MetricsCollector>, config: &CheckConfig) -> Check {
    Check::new(LATENCY_CHECK, config.interval()).with_check(move |endpoint| {
        let metrics = Arc::clone(&metrics);
        Box::pin(async move {
            let tcp = downcast_endpoint::<TcpEndpoint>(endpoint)?;
            let Some(addr) = tcp.resolved.first().copied() else {
                bail!("端点 {} 尚未解析任何地址", tcp.name);
            };

            observe_op(
                &metrics,
                ["connect", &tcp.name, &tcp.cluster_name],
                tcp.connect_once(addr),
            )
            .await?;
            debug!("连接 {} 成功", addr);
            Ok(())
        })
    })
}

/// 集群可用性检查：依次连接所有节点，没有任何节点可连接时失败
pub fn availability_check(metrics: Arc<MetricsCollector>, config: &CheckConfig) -> Check {
    Check::new(AVAILABILITY_CHECK, config.interval()).with_check(move |endpoint| {
        let metrics = Arc::clone(&metrics);
        Box::pin(async move {
            let tcp = downcast_endpoint::<TcpEndpoint>(endpoint)?;

            let mut available = 0;
            for addr in &tcp.resolved {
                let node = addr.to_string();
                let result = observe_op(
                    &metrics,
                    ["availability", &node, &tcp.cluster_name],
                    tcp.connect_once(*addr),
                )
                .await;
                match result {
                    Ok(()) => available += 1,
                    Err(e) => debug!("节点不可用: {:#}", e),
                }
            }

            if available == 0 {
                bail!(
                    "集群 {} 的 {} 个节点都不可用",
                    tcp.cluster_name,
                    tcp.resolved.len()
                );
            }
            debug!(
                "集群 {} 可用节点 {}/{}",
                tcp.cluster_name,
                available,
                tcp.resolved.len()
            );
            Ok(())
        })
    })
}

/// 创建生成TCP端点的拓扑构建器
pub fn topology_builder(config: &Config) -> TopologyBuilder {
    let connect_timeout = config.tcp.connect_timeout();
    let members = ClusterMembers::default();
    TopologyBuilder::new(
        config.discovery.meta_cluster_key.clone(),
        move |cluster_name, entries| {
            let endpoint = TcpEndpoint::cluster(cluster_name, entries, connect_timeout);
            members.update(cluster_name, endpoint.servers.clone());
            Ok(Box::new(endpoint.with_members(members.clone())) as Box<dyn ProbeableEndpoint>)
        },
        move |cluster_name, entry| {
            Ok(Box::new(TcpEndpoint::node(cluster_name, entry, connect_timeout))
                as Box<dyn ProbeableEndpoint>)
        },
    )
}

/// 按配置向调度器注册启用的TCP检查
pub fn register_checks(
    scheduler: &mut ProbingScheduler,
    config: &Config,
    metrics: Arc<MetricsCollector>,
) {
    let checks = &config.checks;
    if checks.latency_check.enable {
        scheduler.register_new_node_check(latency_check(
            Arc::clone(&metrics),
            &checks.latency_check,
        ));
    }
    if checks.availability_check.enable {
        scheduler.register_new_cluster_check(availability_check(
            metrics,
            &checks.availability_check,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::DummyEndpoint;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn entry(address: &str, port: u16) -> ServiceEntry {
        ServiceEntry {
            service: "tcp".to_string(),
            address: address.to_string(),
            port,
            tags: Vec::new(),
            meta: HashMap::from([("CLUSTER".to_string(), "c1".to_string())]),
        }
    }

    /// 获取一个当前没有监听的本地端口
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn check_config() -> CheckConfig {
        CheckConfig {
            enable: true,
            interval_seconds: 1,
        }
    }

    #[test]
    fn test_hash_is_cluster_and_name() {
        let node = TcpEndpoint::node("c1", &entry("10.0.0.1", 11211), Duration::from_secs(1));
        assert_eq!(node.hash_key(), "c1/10.0.0.1:11211");
        assert!(!node.is_cluster());

        let cluster = TcpEndpoint::cluster(
            "c1",
            &[entry("10.0.0.2", 11211), entry("10.0.0.1", 11211)],
            Duration::from_secs(1),
        );
        // 成员地址不影响哈希
        assert_eq!(cluster.hash_key(), "c1/c1");
        assert_eq!(cluster.servers, vec!["10.0.0.1:11211", "10.0.0.2:11211"]);
        assert!(cluster.is_cluster());
    }

    #[test]
    fn test_added_node_only_starts_that_node() {
        let builder = topology_builder(&Config::default());
        let old = builder
            .build(&[entry("10.0.0.1", 11211), entry("10.0.0.2", 11211)])
            .unwrap();
        let new = builder
            .build(&[
                entry("10.0.0.1", 11211),
                entry("10.0.0.2", 11211),
                entry("10.0.0.3", 11211),
            ])
            .unwrap();

        let (to_stop, to_start) = old.diff(&new);
        assert!(to_stop.is_empty());
        let started: Vec<String> = to_start.iter().map(|e| e.hash_key()).collect();
        assert_eq!(started, vec!["c1/10.0.0.3:11211"]);

        // 反向：移除节点只停止该节点
        let (to_stop, to_start) = new.diff(&old);
        assert!(to_start.is_empty());
        let stopped: Vec<String> = to_stop.iter().map(|e| e.hash_key()).collect();
        assert_eq!(stopped, vec!["c1/10.0.0.3:11211"]);
    }

    #[tokio::test]
    async fn test_cluster_refresh_picks_up_new_members() {
        let members = ClusterMembers::default();
        let mut cluster =
            TcpEndpoint::cluster("c1", &[entry("127.0.0.1", 11211)], Duration::from_secs(1))
                .with_members(members.clone());
        cluster.connect().await.unwrap();
        assert_eq!(cluster.resolved().len(), 1);

        members.update(
            "c1",
            vec!["127.0.0.1:11211".to_string(), "127.0.0.1:11212".to_string()],
        );
        cluster.refresh().await.unwrap();
        assert_eq!(cluster.servers.len(), 2);
        assert_eq!(cluster.resolved().len(), 2);
        assert_eq!(cluster.hash_key(), "c1/c1");
    }

    #[tokio::test]
    async fn test_connect_resolves_and_close_clears() {
        let mut node = TcpEndpoint::node("c1", &entry("127.0.0.1", 11211), Duration::from_secs(1));
        node.connect().await.unwrap();
        assert_eq!(node.resolved().len(), 1);

        node.close().await.unwrap();
        assert!(node.resolved().is_empty());
    }

    #[tokio::test]
    async fn test_latency_check_observes_success_and_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let check = latency_check(Arc::clone(&metrics), &check_config());

        let mut node = TcpEndpoint::node("c1", &entry("127.0.0.1", port), Duration::from_secs(1));
        node.connect().await.unwrap();
        let name = node.name();

        (check.check_fn)(&mut node).await.unwrap();
        assert_eq!(metrics.op_failure_count("connect", &name, "c1"), 0);

        drop(listener);
        assert!((check.check_fn)(&mut node).await.is_err());
        assert_eq!(metrics.op_failure_count("connect", &name, "c1"), 1);

        let rendered = metrics.gather_metrics().unwrap();
        assert!(rendered.contains("blackbox_prober_tcp_op_latency_count"));
    }

    #[tokio::test]
    async fn test_latency_check_rejects_other_endpoints() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let check = latency_check(metrics, &check_config());

        let mut dummy = DummyEndpoint::new("node", "hash");
        let err = (check.check_fn)(&mut dummy).await.unwrap_err();
        assert!(err.to_string().contains("TcpEndpoint"));
    }

    #[tokio::test]
    async fn test_availability_check() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().port();
        let dead = closed_port().await;
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let check = availability_check(metrics, &check_config());

        let mut cluster = TcpEndpoint::cluster(
            "c1",
            &[entry("127.0.0.1", live), entry("127.0.0.1", dead)],
            Duration::from_secs(1),
        );
        cluster.connect().await.unwrap();
        (check.check_fn)(&mut cluster).await.unwrap();

        let mut all_dead =
            TcpEndpoint::cluster("c2", &[entry("127.0.0.1", dead)], Duration::from_secs(1));
        all_dead.connect().await.unwrap();
        let err = (check.check_fn)(&mut all_dead).await.unwrap_err();
        assert!(err.to_string().contains("都不可用"));
    }

    #[test]
    fn test_register_checks_respects_enable_flags() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let mut scheduler = ProbingScheduler::new(rx, Arc::clone(&metrics));

        let mut config = Config::default();
        config.checks.availability_check.enable = false;
        register_checks(&mut scheduler, &config, metrics);

        let debug = format!("{scheduler:?}");
        assert!(debug.contains(LATENCY_CHECK));
        assert!(!debug.contains(AVAILABILITY_CHECK));
    }

    #[test]
    fn test_topology_builder_creates_tcp_endpoints() {
        let config = Config::default();
        let builder = topology_builder(&config);

        let map = builder
            .build(&[entry("10.0.0.1", 11211), entry("10.0.0.2", 11211)])
            .unwrap();
        assert_eq!(map.clusters.len(), 1);
        assert_eq!(map.endpoint_count(), 3);
        assert!(map
            .endpoint_hashes()
            .contains("c1/10.0.0.2:11211"));
    }
}
