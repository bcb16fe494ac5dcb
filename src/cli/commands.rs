//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{ConfigLoader, TomlConfigLoader};
use crate::error::Result;
use crate::service::ServiceLauncher;
use async_trait::async_trait;
use std::path::Path;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            println!("{}", Self::render(format)?);
        }
        Ok(())
    }
}

impl VersionCommand {
    /// 按输出格式渲染版本信息
    fn render(format: &OutputFormat) -> Result<String> {
        Ok(match format {
            OutputFormat::Json => {
                let version_info = serde_json::json!({
                    "name": crate::APP_NAME,
                    "version": crate::VERSION,
                    "description": crate::APP_DESCRIPTION
                });
                serde_json::to_string_pretty(&version_info)?
            }
            OutputFormat::Text => format!(
                "{} v{}\n{}",
                crate::APP_NAME,
                crate::VERSION,
                crate::APP_DESCRIPTION
            ),
        })
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate { verbose } = &args.command {
            self.validate_config_file(&args.get_config_path(), *verbose)
                .await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        if verbose {
            println!("配置验证通过！");
            println!("全局配置:");
            println!("  日志级别: {}", config.global.log_level);
            println!("  监听地址: {}", config.global.http_listen_addr);
            println!("  刷新间隔: {}秒", config.global.refresh_interval_seconds);
            println!("  关闭等待: {}秒", config.global.shutdown_timeout_seconds);

            println!("服务发现:");
            println!("  集群键: {}", config.discovery.meta_cluster_key);
            println!("  推送间隔: {}秒", config.discovery.resend_interval_seconds);
            for (i, entry) in config.discovery.services.iter().enumerate() {
                let cluster = entry
                    .meta
                    .get(&config.discovery.meta_cluster_key)
                    .map(String::as_str)
                    .unwrap_or("-");
                println!(
                    "  {}. {} {} (集群: {})",
                    i + 1,
                    entry.service,
                    entry.socket_addr(),
                    cluster
                );
            }

            println!("检查:");
            for (name, check) in [
                ("latency_check", &config.checks.latency_check),
                ("availability_check", &config.checks.availability_check),
            ] {
                println!(
                    "  {}: {} (间隔 {}秒)",
                    name,
                    if check.enable { "启用" } else { "禁用" },
                    check.interval_seconds
                );
            }
        } else {
            println!("✓ 配置文件验证通过");
            println!(
                "✓ 找到 {} 个服务条目",
                config.discovery.services.len()
            );
        }

        Ok(())
    }
}

/// 运行命令
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Run { listen_addr } = &args.command else {
            return Ok(());
        };

        let config_path = args.get_config_path();
        let config =
            ServiceLauncher::load_and_validate_config(&config_path, listen_addr.as_deref())
                .await?;
        let components =
            ServiceLauncher::initialize_service_components(&config, Some(&config_path))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        // 监听 Ctrl+C
        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到Ctrl+C信号，准备关闭服务");
                    let _ = signal_tx.send(());
                }
                Err(e) => error!("监听关闭信号失败: {}", e),
            }
        });

        ServiceLauncher::run(components, &shutdown_tx).await?;
        Ok(())
    }
}
