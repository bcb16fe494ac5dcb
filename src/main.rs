//! Blackbox Prober 主程序入口
//!
//! 数据存储黑盒探测工具

use anyhow::{Context, Result};
use blackbox_prober::cli::args::{Args, Commands};
use blackbox_prober::cli::commands::{Command, RunCommand, ValidateCommand, VersionCommand};
use blackbox_prober::config::{ConfigLoader, TomlConfigLoader};
use blackbox_prober::logging::{LogConfig, LoggingSystem};
use clap::Parser;
use log::LevelFilter;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: resolve_log_level(&args).await,
        console: true,
        json_format: args.json_logs,
        ..Default::default()
    };

    let _logging_system =
        LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Blackbox Prober v{} 启动", blackbox_prober::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 确定日志级别：命令行优先，其次是配置文件，最后默认 info
async fn resolve_log_level(args: &Args) -> LevelFilter {
    if let Some(level) = args.log_level {
        return level.into();
    }
    if !matches!(args.command, Commands::Run { .. }) {
        return LevelFilter::Info;
    }

    // 配置错误留给 run 命令报告
    TomlConfigLoader::new(true)
        .load_from_file(args.get_config_path())
        .await
        .map(|config| LogConfig::level_from_str(&config.global.log_level))
        .unwrap_or(LevelFilter::Info)
}

/// 执行CLI命令
async fn execute_command(args: &Args) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Run { .. } => Box::new(RunCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    };
    command.execute(args).await.map_err(|e| anyhow::anyhow!(e))
}
