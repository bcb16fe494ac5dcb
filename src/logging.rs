//! 日志系统模块
//!
//! 基于 tracing 的结构化日志，log crate 的记录通过 LogTracer 桥接进来

use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化结果
    init_result: Option<Result<(), String>>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

fn lock_state() -> MutexGuard<'static, GlobalLoggingState> {
    GLOBAL_LOGGING_STATE
        .get_or_init(|| Mutex::new(GlobalLoggingState::default()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// 从配置文件中的级别字符串解析日志级别，无法识别时使用 info
    pub fn level_from_str(level: &str) -> LevelFilter {
        level.parse().unwrap_or(LevelFilter::Info)
    }
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    /// 配置
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// 重复调用不会重复安装全局 subscriber。
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        Self::setup_logging_with_options(config, false)
    }

    /// 初始化日志系统（带选项）
    ///
    /// # 参数
    /// * `config` - 日志配置
    /// * `force_reinit` - 是否强制重新初始化（主要用于测试）
    pub fn setup_logging_with_options(
        config: LogConfig,
        force_reinit: bool,
    ) -> anyhow::Result<Self> {
        {
            let state = lock_state();
            if state.initialized && !force_reinit {
                if let Some(Err(e)) = &state.init_result {
                    return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
                }
                return Ok(Self { config });
            }
        }

        let init_result = Self::perform_initialization(&config);

        {
            let mut state = lock_state();
            state.initialized = true;
            state.current_config = Some(config.clone());
            state.init_result = Some(init_result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        }

        init_result?;
        Ok(Self { config })
    }

    /// 当前实例使用的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 执行实际的日志系统初始化
    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)?;
        Ok(())
    }

    /// 初始化 LogTracer
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        let result = LOG_TRACER_INIT.get_or_init(|| LogTracer::init().map_err(|e| e.to_string()));

        result
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 构建过滤器：全局级别加上模块级别指令
    fn build_env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
        let mut env_filter = EnvFilter::from_default_env()
            .add_directive(Self::convert_level_to_directive(config.level));

        for (module, level) in &config.module_levels {
            let directive: Directive = format!("{}={}", module, Self::level_to_string(*level))
                .parse()
                .map_err(|e| anyhow::anyhow!("无效的模块日志级别 {}: {}", module, e))?;
            env_filter = env_filter.add_directive(directive);
        }

        Ok(env_filter)
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let env_filter = Self::build_env_filter(config)?;

        let fmt_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        } else {
            fmt::layer()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .boxed()
        };

        let result = match (&config.file_path, config.console) {
            (Some(file_path), false) => {
                let file = std::fs::File::create(file_path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_file(true)
                    .with_line_number(true);

                registry().with(env_filter).with(file_layer).try_init()
            }
            _ => registry().with(env_filter).with(fmt_layer).try_init(),
        };

        match result {
            Ok(()) => {
                tracing::info!("日志系统初始化完成");
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains(
                    "attempted to set a logger after the logging system was already initialized",
                ) || error_msg.contains("a global default trace dispatcher has already been set")
                {
                    // 测试中多次初始化会走到这里
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "tracing subscriber初始化失败: {}",
                        error_msg
                    ))
                }
            }
        }
    }

    /// 将 log::LevelFilter 转换为 tracing 的指令
    fn convert_level_to_directive(level: LevelFilter) -> Directive {
        use tracing_subscriber::filter::LevelFilter as TracingLevel;
        let level = match level {
            LevelFilter::Off => TracingLevel::OFF,
            LevelFilter::Error => TracingLevel::ERROR,
            LevelFilter::Warn => TracingLevel::WARN,
            LevelFilter::Info => TracingLevel::INFO,
            LevelFilter::Debug => TracingLevel::DEBUG,
            LevelFilter::Trace => TracingLevel::TRACE,
        };
        Directive::from(level)
    }

    /// 将 log::LevelFilter 转换为字符串
    fn level_to_string(level: LevelFilter) -> &'static str {
        match level {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        }
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .map(|_| lock_state().initialized)
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|_| lock_state().current_config.clone())
    }

    /// 重置日志系统状态（主要用于测试）
    #[cfg(test)]
    pub fn reset_for_testing() {
        let mut state = lock_state();
        *state = GlobalLoggingState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    fn create_test_config() -> LogConfig {
        LogConfig {
            level: LevelFilter::Info,
            ..Default::default()
        }
    }

    #[test]
    #[serial]
    fn test_logging_system_single_initialization() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();
        assert!(LoggingSystem::setup_logging(config.clone()).is_ok());
        assert!(LoggingSystem::is_initialized());

        // 第二次初始化直接复用已安装的 subscriber
        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_force_reinit() {
        LoggingSystem::reset_for_testing();

        let config = create_test_config();
        LoggingSystem::setup_logging(config.clone()).unwrap();
        assert!(LoggingSystem::setup_logging_with_options(config, true).is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_with_file_output() {
        LoggingSystem::reset_for_testing();

        let temp_file = NamedTempFile::new().unwrap();
        let config = LogConfig {
            file_path: Some(temp_file.path().to_path_buf()),
            console: false,
            ..create_test_config()
        };

        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    #[serial]
    fn test_logging_system_with_json_format() {
        LoggingSystem::reset_for_testing();

        let config = LogConfig {
            json_format: true,
            ..create_test_config()
        };
        let system = LoggingSystem::setup_logging(config).unwrap();
        assert!(system.config().json_format);
    }

    #[test]
    #[serial]
    fn test_current_config_retrieval() {
        LoggingSystem::reset_for_testing();

        let config = LogConfig {
            level: LevelFilter::Debug,
            ..create_test_config()
        };
        LoggingSystem::setup_logging(config).unwrap();

        let current = LoggingSystem::current_config().unwrap();
        assert_eq!(current.level, LevelFilter::Debug);
        assert!(current.console);
    }

    #[test]
    #[serial]
    fn test_module_level_filtering() {
        LoggingSystem::reset_for_testing();

        let mut config = create_test_config();
        config
            .module_levels
            .insert("blackbox_prober::scheduler".to_string(), LevelFilter::Debug);
        config
            .module_levels
            .insert("hyper".to_string(), LevelFilter::Warn);

        assert!(LoggingSystem::setup_logging(config).is_ok());
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!(LogConfig::level_from_str("debug"), LevelFilter::Debug);
        assert_eq!(LogConfig::level_from_str("WARN"), LevelFilter::Warn);
        assert_eq!(LogConfig::level_from_str("nonsense"), LevelFilter::Info);
    }
}
