//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Blackbox Prober - 数据存储黑盒探测工具
#[derive(Parser, Debug, Clone)]
#[command(
    name = "blackbox-prober",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "配置文件路径",
        env = "BLACKBOX_PROBER_CONFIG"
    )]
    pub config: Option<PathBuf>,

    /// 日志级别（未指定时使用配置文件中的级别）
    #[arg(
        short,
        long,
        global = true,
        value_enum,
        help = "日志级别",
        env = "BLACKBOX_PROBER_LOG_LEVEL"
    )]
    pub log_level: Option<LogLevel>,

    /// 是否输出JSON格式日志
    #[arg(long, global = true, help = "输出JSON格式日志")]
    pub json_logs: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    /// 跟踪级别
    Trace,
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 启动探测服务
    Run {
        /// 覆盖配置中的指标服务监听地址
        #[arg(
            long,
            value_name = "ADDR",
            help = "指标服务监听地址",
            env = "BLACKBOX_PROBER_LISTEN_ADDR"
        )]
        listen_addr: Option<String>,
    },

    /// 验证配置文件
    Validate {
        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

impl Args {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let args = Args::try_parse_from([
            "blackbox-prober",
            "run",
            "--config",
            "/etc/blackbox-prober/config.toml",
            "--listen-addr",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(
            args.get_config_path(),
            PathBuf::from("/etc/blackbox-prober/config.toml")
        );
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        match args.command {
            Commands::Run { listen_addr } => {
                assert_eq!(listen_addr.as_deref(), Some("127.0.0.1:9000"))
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_version_json() {
        let args =
            Args::try_parse_from(["blackbox-prober", "--json-logs", "version", "-f", "json"]).unwrap();

        assert!(args.json_logs);
        assert!(matches!(
            args.command,
            Commands::Version {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(log::LevelFilter::from(LogLevel::Trace), log::LevelFilter::Trace);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
