//! Blackbox Prober - 数据存储黑盒探测工具
//!
//! 根据服务发现得到的集群拓扑，为每个端点维持一个独立的探测工作者：
//! - 拓扑变化时增量启停工作者
//! - 每个工作者按各自的间隔执行检查并定期刷新端点
//! - 检查结果以 Prometheus 指标形式暴露
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod probes;
pub mod scheduler;
pub mod service;
pub mod topology;
pub mod web;

// 重新导出主要类型
pub use config::{Config, GlobalConfig};
pub use error::{ProberError, SchedulerError};
pub use metrics::MetricsCollector;
pub use scheduler::{Check, ProbingScheduler};
pub use topology::{Cluster, ClusterMap, ProbeableEndpoint};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
