//! 检查注册模型
//!
//! 一个检查由名称、准备/检查/清理三个生命周期函数以及执行间隔组成。

use crate::topology::ProbeableEndpoint;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 检查生命周期函数
///
/// 接收端点的独占引用，返回的 future 可以在该借用期间内使用端点。
pub type CheckFn = Arc<
    dyn for<'a> Fn(&'a mut dyn ProbeableEndpoint) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync,
>;

fn noop_fn(_endpoint: &mut dyn ProbeableEndpoint) -> BoxFuture<'_, anyhow::Result<()>> {
    Box::pin(async { Ok(()) })
}

/// 不做任何事情的检查函数，用于没有准备或清理工作的检查
pub fn noop() -> CheckFn {
    Arc::new(noop_fn)
}

/// 一个注册到调度器的检查
#[derive(Clone)]
pub struct Check {
    /// 检查名称
    pub name: String,
    /// 端点连接后调用一次，用于准备数据库（创建监控用的键空间、桶等）
    pub prepare_fn: CheckFn,
    /// 每个间隔调用一次，用于监控端点并产生指标
    pub check_fn: CheckFn,
    /// 端点终止前调用，用于清理数据库
    pub teardown_fn: CheckFn,
    /// 执行 `check_fn` 的间隔
    pub interval: Duration,
}

impl Check {
    /// 创建三个阶段都为空操作的检查
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            prepare_fn: noop(),
            check_fn: noop(),
            teardown_fn: noop(),
            interval,
        }
    }

    /// 设置准备函数
    pub fn with_prepare<F>(mut self, prepare_fn: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn ProbeableEndpoint) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.prepare_fn = Arc::new(prepare_fn);
        self
    }

    /// 设置检查函数
    pub fn with_check<F>(mut self, check_fn: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn ProbeableEndpoint) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.check_fn = Arc::new(check_fn);
        self
    }

    /// 设置清理函数
    pub fn with_teardown<F>(mut self, teardown_fn: F) -> Self
    where
        F: for<'a> Fn(&'a mut dyn ProbeableEndpoint) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.teardown_fn = Arc::new(teardown_fn);
        self
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
