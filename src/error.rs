//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// Blackbox Prober 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum ProberError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 调度相关错误
    #[error("调度错误: {0}")]
    Scheduler(#[from] SchedulerError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 指标注册错误
    #[error("指标错误: {0}")]
    Metrics(#[from] prometheus::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 启动探测工作者时的错误
///
/// 只在调度器线程上同步产生，工作者任务启动后的错误不会回传到这里。
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// 端点连接失败
    #[error("连接端点 {hash} 时初始化失败: {source}")]
    Connect {
        hash: String,
        #[source]
        source: anyhow::Error,
    },

    /// 检查准备阶段失败
    #[error("准备端点 {hash} 的检查 {check} 时初始化失败: {source}")]
    Prepare {
        hash: String,
        check: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SchedulerError {
    /// 出错端点的哈希
    pub fn endpoint_hash(&self) -> &str {
        match self {
            SchedulerError::Connect { hash, .. } | SchedulerError::Prepare { hash, .. } => hash,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ProberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display_contains_hash() {
        let err = SchedulerError::Prepare {
            hash: "c1/10.0.0.1:11211".to_string(),
            check: "latency_check".to_string(),
            source: anyhow::anyhow!("bucket missing"),
        };

        let message = err.to_string();
        assert!(message.contains("c1/10.0.0.1:11211"));
        assert!(message.contains("latency_check"));
        assert!(message.contains("bucket missing"));
        assert_eq!(err.endpoint_hash(), "c1/10.0.0.1:11211");
    }

    #[test]
    fn test_config_error_converts_into_prober_error() {
        let err: ProberError = ConfigError::FileNotFound {
            path: "/etc/prober.toml".to_string(),
        }
        .into();
        assert!(matches!(err, ProberError::Config(_)));
        assert!(err.to_string().contains("/etc/prober.toml"));
    }
}
