//! 指标导出HTTP服务
//!
//! 提供 `/metrics`（Prometheus文本格式）和 `/ready` 两个端点

pub mod handlers;
pub mod server;

use crate::metrics::MetricsCollector;
use std::sync::Arc;

pub use server::{create_router, MetricsServer};

/// HTTP处理函数共享的状态
#[derive(Debug, Clone)]
pub struct WebAppState {
    /// 指标收集器
    pub metrics: Arc<MetricsCollector>,
}

impl WebAppState {
    /// 创建新的状态
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}
