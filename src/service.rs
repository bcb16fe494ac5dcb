//! 服务管理模块
//!
//! 负责探测服务的组件初始化和生命周期管理

use crate::config::{self, Config, ConfigLoader, TomlConfigLoader};
use crate::discovery::{EntrySource, StaticDiscoverer};
use crate::metrics::MetricsCollector;
use crate::probes::tcp;
use crate::scheduler::ProbingScheduler;
use crate::web::MetricsServer;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

/// 服务组件
#[derive(Debug)]
pub struct ServiceComponents {
    /// 指标收集器
    pub metrics: Arc<MetricsCollector>,
    /// 探测调度器
    pub scheduler: ProbingScheduler,
    /// 拓扑发现器
    pub discoverer: StaticDiscoverer,
    /// 指标服务器
    pub server: MetricsServer,
}

/// 服务启动器
pub struct ServiceLauncher;

impl ServiceLauncher {
    /// 加载和验证配置
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `listen_addr` - 命令行覆盖的监听地址
    pub async fn load_and_validate_config(
        config_path: &Path,
        listen_addr: Option<&str>,
    ) -> Result<Config> {
        info!("加载配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let mut config = loader
            .load_from_file(config_path)
            .await
            .context("加载配置文件失败")?;

        // 应用命令行参数覆盖
        if let Some(listen_addr) = listen_addr {
            config.global.http_listen_addr = listen_addr.to_string();
        }

        config::validate_config(&config)
            .map_err(|e| anyhow::anyhow!(e))
            .context("配置验证失败")?;

        info!(
            "配置加载成功，共 {} 个服务条目",
            config.discovery.services.len()
        );
        Ok(config)
    }

    /// 初始化服务组件
    ///
    /// 提供配置文件路径时，发现器每次都会重新读取该文件中的服务列表。
    pub fn initialize_service_components(
        config: &Config,
        config_path: Option<&Path>,
    ) -> Result<ServiceComponents> {
        info!("初始化服务组件...");

        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        let (topology_tx, topology_rx) = mpsc::channel(config.global.topology_channel_capacity);

        let mut scheduler = ProbingScheduler::new(topology_rx, Arc::clone(&metrics))
            .with_refresh_interval(config.global.refresh_interval())
            .with_shutdown_timeout(config.global.shutdown_timeout());
        tcp::register_checks(&mut scheduler, config, Arc::clone(&metrics));

        let source = match config_path {
            Some(path) => EntrySource::File(path.to_path_buf()),
            None => EntrySource::Inline(config.discovery.services.clone()),
        };
        let discoverer = StaticDiscoverer::new(
            source,
            tcp::topology_builder(config),
            topology_tx,
            config.discovery.resend_interval(),
            Arc::clone(&metrics),
        );

        let addr: SocketAddr = config
            .global
            .http_listen_addr
            .parse()
            .with_context(|| format!("无效的监听地址: {}", config.global.http_listen_addr))?;
        let server = MetricsServer::new(addr, Arc::clone(&metrics));

        Ok(ServiceComponents {
            metrics,
            scheduler,
            discoverer,
            server,
        })
    }

    /// 运行所有组件，直到关闭信号发出
    ///
    /// 调度器退出时会先停止所有探测工作者。
    pub async fn run(
        components: ServiceComponents,
        shutdown_tx: &broadcast::Sender<()>,
    ) -> Result<()> {
        let ServiceComponents {
            scheduler,
            discoverer,
            server,
            ..
        } = components;

        let listener = server.bind().await.context("绑定指标服务监听地址失败")?;

        let server_shutdown = shutdown_tx.subscribe();
        let discovery_shutdown = shutdown_tx.subscribe();
        let scheduler_shutdown = shutdown_tx.subscribe();

        let server_handle = tokio::spawn(async move {
            if let Err(e) = server.serve(listener, server_shutdown).await {
                error!("指标服务器运行失败: {}", e);
            }
        });
        let discovery_handle = tokio::spawn(discoverer.start(discovery_shutdown));

        scheduler.start(scheduler_shutdown).await;

        // 调度器也可能因为拓扑通道关闭而提前退出，通知其余组件
        let _ = shutdown_tx.send(());

        if let Err(e) = discovery_handle.await {
            error!("服务发现任务异常退出: {}", e);
        }
        if let Err(e) = server_handle.await {
            error!("指标服务器任务异常退出: {}", e);
        }

        info!("服务已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_config_with_listen_addr_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[global]\nhttp_listen_addr = \"0.0.0.0:8080\"").unwrap();

        let config = ServiceLauncher::load_and_validate_config(file.path(), Some("127.0.0.1:9999"))
            .await
            .unwrap();
        assert_eq!(config.global.http_listen_addr, "127.0.0.1:9999");

        let err = ServiceLauncher::load_and_validate_config(file.path(), Some("not-an-addr"))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("监听地址"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let mut config = Config::default();
        config.global.http_listen_addr = "127.0.0.1:0".to_string();

        let components = ServiceLauncher::initialize_service_components(&config, None).unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);

        let sender = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = sender.send(());
        });

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            ServiceLauncher::run(components, &shutdown_tx),
        )
        .await
        .expect("服务未在关闭信号后退出")
        .unwrap();
    }
}
