//! 静态服务发现
//!
//! 从内联列表或配置文件读取服务条目，按固定间隔构建并推送完整的拓扑快照。
//! 即使拓扑没有变化也会重新推送，调度器依靠这一点重试启动失败的端点。

use super::{ServiceEntry, TopologyBuilder};
use crate::config::{ConfigLoader, TomlConfigLoader};
use crate::metrics::MetricsCollector;
use crate::topology::ClusterMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// 服务条目来源
#[derive(Debug, Clone)]
pub enum EntrySource {
    /// 固定的条目列表
    Inline(Vec<ServiceEntry>),
    /// 每次发现时重新读取配置文件中的 `[[discovery.services]]`
    File(PathBuf),
}

/// 静态发现器
#[derive(Debug)]
pub struct StaticDiscoverer {
    source: EntrySource,
    builder: TopologyBuilder,
    topology_tx: mpsc::Sender<ClusterMap>,
    resend_interval: Duration,
    metrics: Arc<MetricsCollector>,
}

impl StaticDiscoverer {
    /// 创建静态发现器
    pub fn new(
        source: EntrySource,
        builder: TopologyBuilder,
        topology_tx: mpsc::Sender<ClusterMap>,
        resend_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            source,
            builder,
            topology_tx,
            resend_interval,
            metrics,
        }
    }

    /// 读取当前的服务条目
    async fn load_entries(&self) -> anyhow::Result<Vec<ServiceEntry>> {
        match &self.source {
            EntrySource::Inline(entries) => Ok(entries.clone()),
            EntrySource::File(path) => {
                let loader = TomlConfigLoader::new(true);
                let config = loader.load_from_file(path).await?;
                Ok(config.discovery.services)
            }
        }
    }

    /// 执行一次发现并构建拓扑
    pub async fn discover_once(&self) -> anyhow::Result<ClusterMap> {
        let entries = self.load_entries().await?;
        let topology = self.builder.build(&entries)?;
        debug!(
            "发现 {} 个服务条目，{} 个集群",
            entries.len(),
            topology.clusters.len()
        );
        Ok(topology)
    }

    /// 周期性推送拓扑，直到收到关闭信号或调度器不再接收
    pub async fn start(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("静态服务发现已启动，推送间隔: {:?}", self.resend_interval);

        let mut ticker = interval(self.resend_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止服务发现");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let topology = match self.discover_once().await {
                Ok(topology) => topology,
                Err(e) => {
                    error!("服务发现失败: {:#}", e);
                    self.metrics.record_discovery_failure();
                    continue;
                }
            };

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止服务发现");
                    return;
                }
                sent = self.topology_tx.send(topology) => {
                    if sent.is_err() {
                        info!("拓扑接收端已关闭，停止服务发现");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::tests::{dummy_builder, entry};
    use std::io::Write;

    fn metrics() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new().unwrap())
    }

    #[tokio::test]
    async fn test_snapshot_is_resent_periodically() {
        let (topology_tx, mut topology_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let discoverer = StaticDiscoverer::new(
            EntrySource::Inline(vec![entry("10.0.0.1", Some("a"))]),
            dummy_builder(),
            topology_tx,
            Duration::from_millis(10),
            metrics(),
        );
        let handle = tokio::spawn(discoverer.start(shutdown_rx));

        for _ in 0..3 {
            let topology = tokio::time::timeout(Duration::from_secs(1), topology_rx.recv())
                .await
                .expect("未收到拓扑")
                .expect("拓扑通道已关闭");
            assert_eq!(topology.endpoint_count(), 2);
        }

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("服务发现未退出")
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_source_reads_services() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[discovery.services]]
service = "memcached"
address = "10.0.0.1"
port = 11211
meta = {{ CLUSTER = "a" }}

[[discovery.services]]
service = "memcached"
address = "10.0.0.2"
port = 11211
meta = {{ CLUSTER = "b" }}
"#
        )
        .unwrap();

        let (topology_tx, _topology_rx) = mpsc::channel(1);
        let discoverer = StaticDiscoverer::new(
            EntrySource::File(file.path().to_path_buf()),
            dummy_builder(),
            topology_tx,
            Duration::from_secs(30),
            metrics(),
        );

        let topology = discoverer.discover_once().await.unwrap();
        assert_eq!(topology.clusters.len(), 2);
        assert_eq!(topology.endpoint_count(), 4);
    }

    #[tokio::test]
    async fn test_failed_discovery_is_counted() {
        let (topology_tx, mut topology_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let metrics = metrics();
        let discoverer = StaticDiscoverer::new(
            EntrySource::File(PathBuf::from("/nonexistent/blackbox-prober.toml")),
            dummy_builder(),
            topology_tx,
            Duration::from_millis(10),
            Arc::clone(&metrics),
        );
        let handle = tokio::spawn(discoverer.start(shutdown_rx));

        tokio::time::timeout(Duration::from_secs(2), async {
            while metrics.discovery_failure_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("服务发现失败未被计数");
        assert!(topology_rx.try_recv().is_err());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let (topology_tx, topology_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        drop(topology_rx);

        let discoverer = StaticDiscoverer::new(
            EntrySource::Inline(Vec::new()),
            dummy_builder(),
            topology_tx,
            Duration::from_millis(10),
            metrics(),
        );

        tokio::time::timeout(Duration::from_secs(1), discoverer.start(shutdown_rx))
            .await
            .expect("接收端关闭后服务发现应该退出");
    }
}
