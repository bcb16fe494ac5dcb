//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::discovery::ServiceEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// 各类间隔允许的最大秒数
pub const MAX_INTERVAL_SECONDS: u64 = 86400;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 服务发现配置
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// TCP探测配置
    #[serde(default)]
    pub tcp: TcpConfig,
    /// 检查配置
    #[serde(default)]
    pub checks: ChecksConfig,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 指标HTTP服务监听地址
    #[serde(default = "default_http_listen_addr")]
    pub http_listen_addr: String,
    /// 端点刷新间隔（秒）
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    /// 拓扑更新通道容量
    #[serde(default = "default_topology_channel_capacity")]
    pub topology_channel_capacity: usize,
    /// 关闭时等待探测工作者清理的时间（秒）
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            http_listen_addr: default_http_listen_addr(),
            refresh_interval_seconds: default_refresh_interval(),
            topology_channel_capacity: default_topology_channel_capacity(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

impl GlobalConfig {
    /// 端点刷新间隔
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    /// 关闭等待时间
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// 服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// 服务元数据中表示集群名称的键
    #[serde(default = "default_meta_cluster_key")]
    pub meta_cluster_key: String,
    /// 重新推送拓扑的间隔（秒）
    #[serde(default = "default_resend_interval")]
    pub resend_interval_seconds: u64,
    /// 静态服务列表
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            meta_cluster_key: default_meta_cluster_key(),
            resend_interval_seconds: default_resend_interval(),
            services: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// 重新推送拓扑的间隔
    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_seconds)
    }
}

/// TCP探测配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpConfig {
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl TcpConfig {
    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 所有检查的配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChecksConfig {
    /// 节点延迟检查
    #[serde(default)]
    pub latency_check: CheckConfig,
    /// 集群可用性检查
    #[serde(default)]
    pub availability_check: CheckConfig,
}

/// 单个检查的配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckConfig {
    /// 是否启用
    #[serde(default = "default_enabled")]
    pub enable: bool,
    /// 执行间隔（秒）
    #[serde(default = "default_check_interval")]
    pub interval_seconds: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enable: default_enabled(),
            interval_seconds: default_check_interval(),
        }
    }
}

impl CheckConfig {
    /// 执行间隔
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_http_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_refresh_interval() -> u64 {
    30
}
fn default_topology_channel_capacity() -> usize {
    1
}
fn default_shutdown_timeout() -> u64 {
    10
}
fn default_meta_cluster_key() -> String {
    "CLUSTER".to_string()
}
fn default_resend_interval() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    1000
}
fn default_enabled() -> bool {
    true
}
fn default_check_interval() -> u64 {
    10
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let global = &config.global;

    // 验证日志级别
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            global.log_level, valid_log_levels
        ));
    }

    if global.http_listen_addr.parse::<SocketAddr>().is_err() {
        return Err(format!("无效的监听地址: {}", global.http_listen_addr));
    }

    if global.refresh_interval_seconds == 0 {
        return Err("刷新间隔不能为0".to_string());
    }
    if global.refresh_interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(format!("刷新间隔不能超过{}秒", MAX_INTERVAL_SECONDS));
    }

    if global.shutdown_timeout_seconds > MAX_INTERVAL_SECONDS {
        return Err(format!("关闭等待时间不能超过{}秒", MAX_INTERVAL_SECONDS));
    }

    if global.topology_channel_capacity == 0 {
        return Err("拓扑通道容量不能为0".to_string());
    }

    // 验证服务发现配置
    let discovery = &config.discovery;
    if discovery.meta_cluster_key.trim().is_empty() {
        return Err("集群元数据键不能为空".to_string());
    }

    if discovery.resend_interval_seconds == 0 {
        return Err("拓扑重发间隔不能为0".to_string());
    }
    if discovery.resend_interval_seconds > MAX_INTERVAL_SECONDS {
        return Err(format!("拓扑重发间隔不能超过{}秒", MAX_INTERVAL_SECONDS));
    }

    let mut seen = HashSet::new();
    for (index, entry) in discovery.services.iter().enumerate() {
        if entry.service.trim().is_empty() {
            return Err(format!("第{}个服务的名称不能为空", index + 1));
        }

        if entry.address.trim().is_empty() {
            return Err(format!("服务 '{}' 的地址不能为空", entry.service));
        }

        if entry.port == 0 {
            return Err(format!("服务 '{}' 的端口不能为0", entry.service));
        }

        if !seen.insert((entry.address.as_str(), entry.port)) {
            return Err(format!(
                "重复的服务地址: {}:{}",
                entry.address, entry.port
            ));
        }
    }

    if config.tcp.connect_timeout_ms == 0 {
        return Err("TCP连接超时不能为0".to_string());
    }

    for (name, check) in [
        ("latency_check", &config.checks.latency_check),
        ("availability_check", &config.checks.availability_check),
    ] {
        if !check.enable {
            continue;
        }
        if check.interval_seconds == 0 {
            return Err(format!("检查 {} 的执行间隔不能为0", name));
        }
        if check.interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(format!(
                "检查 {} 的执行间隔不能超过{}秒",
                name, MAX_INTERVAL_SECONDS
            ));
        }
    }

    Ok(())
}
