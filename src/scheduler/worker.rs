//! 探测工作者
//!
//! 每个端点一个工作者任务：连接、准备之后进入运行循环，按各检查的间隔执行检查，
//! 按固定周期刷新端点，收到停止信号后执行清理并关闭端点。

use crate::error::SchedulerError;
use crate::metrics::{MetricsCollector, FUNC_CHECK, FUNC_REFRESH, FUNC_TEARDOWN};
use crate::scheduler::check::Check;
use crate::topology::ProbeableEndpoint;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// 默认的端点刷新间隔
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// 间隔过大导致 `Instant` 溢出时使用的替代时长（约30年）
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `base + interval`，溢出时退化为遥远的将来
fn deadline_after(base: Instant, interval: Duration) -> Instant {
    base.checked_add(interval).unwrap_or_else(|| base + FAR_FUTURE)
}

/// 从 panic 负载中取出可读的消息
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// 单个端点的探测工作者
pub struct ProberWorker {
    /// 工作者独占的端点实例
    endpoint: Box<dyn ProbeableEndpoint>,
    /// 按注册顺序排列的检查
    checks: Vec<Check>,
    /// 停止信号接收器
    control_rx: mpsc::Receiver<()>,
    /// 端点刷新间隔
    refresh_interval: Duration,
    /// 指标收集器
    metrics: Arc<MetricsCollector>,
    /// 端点名称（用于指标标签）
    endpoint_name: String,
}

impl ProberWorker {
    /// 创建新的探测工作者
    ///
    /// # 参数
    /// * `endpoint` - 工作者独占的端点
    /// * `checks` - 要执行的检查
    /// * `control_rx` - 停止信号接收器，发送端全部关闭也视为停止
    /// * `refresh_interval` - 端点刷新间隔
    /// * `metrics` - 指标收集器
    pub fn new(
        endpoint: Box<dyn ProbeableEndpoint>,
        checks: Vec<Check>,
        control_rx: mpsc::Receiver<()>,
        refresh_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let endpoint_name = endpoint.name();
        Self {
            endpoint,
            checks,
            control_rx,
            refresh_interval,
            metrics,
            endpoint_name,
        }
    }

    /// 连接端点
    pub async fn connect(&mut self) -> Result<(), SchedulerError> {
        self.endpoint
            .connect()
            .await
            .map_err(|source| SchedulerError::Connect {
                hash: self.endpoint.hash_key(),
                source,
            })
    }

    /// 按注册顺序执行所有检查的准备函数，遇到第一个失败即返回
    pub async fn prepare_probing(&mut self) -> Result<(), SchedulerError> {
        for check in &self.checks {
            if let Err(source) = (check.prepare_fn)(self.endpoint.as_mut()).await {
                error!("准备检查 {} 失败: {:#}", check.name, source);
                return Err(SchedulerError::Prepare {
                    hash: self.endpoint.hash_key(),
                    check: check.name.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// 关闭端点，失败只记录日志
    pub async fn close_endpoint(&mut self) {
        if let Err(e) = self.endpoint.close().await {
            error!("关闭端点失败: {:#}", e);
        }
    }

    /// 运行探测循环直到收到停止信号，最后关闭端点
    ///
    /// 调用前端点必须已经连接并准备完成。检查、刷新或清理函数 panic 时循环提前结束，
    /// 端点同样会被关闭。
    pub async fn start_probing(mut self) {
        info!("开始探测");

        if self.checks.is_empty() {
            error!("没有注册任何检查，探测未启动");
        } else if let Err(payload) = AssertUnwindSafe(self.probe_loop()).catch_unwind().await {
            error!("探测循环异常终止: {}", panic_message(payload.as_ref()));
            self.metrics.record_worker_panic(&self.endpoint_name);
        }

        // 无论循环如何退出都只关闭一次
        self.close_endpoint().await;
    }

    /// 运行状态：多路等待检查定时器、刷新定时器和停止信号
    async fn probe_loop(&mut self) {
        let now = Instant::now();
        let mut last_checks = vec![now; self.checks.len()];

        let check_timer = sleep_until(self.soonest_due(&last_checks));
        tokio::pin!(check_timer);

        let mut refresh_ticker = interval_at(
            deadline_after(now, self.refresh_interval),
            self.refresh_interval,
        );
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                // 收到停止信号（或调度器已经释放发送端）时终止
                _ = self.control_rx.recv() => {
                    info!("探测被调度器终止");
                    self.teardown().await;
                    return;
                }
                _ = refresh_ticker.tick() => {
                    self.refresh().await;
                }
                _ = &mut check_timer => {
                    debug!("检查待执行的任务");
                    let next = self.run_all_pending_checks(&mut last_checks).await;
                    check_timer.as_mut().reset(next);
                }
            }
        }
    }

    /// 执行所有已到期的检查，返回下一个最早的到期时刻
    async fn run_all_pending_checks(&mut self, last_checks: &mut [Instant]) -> Instant {
        for (check, last_run) in self.checks.iter().zip(last_checks.iter_mut()) {
            if deadline_after(*last_run, check.interval) > Instant::now() {
                continue;
            }

            debug!("执行检查 {}", check.name);
            let result = (check.check_fn)(self.endpoint.as_mut()).await;
            match result {
                Ok(()) => {
                    self.metrics
                        .record_check(FUNC_CHECK, &self.endpoint_name, &check.name, true);
                }
                Err(e) => {
                    error!("检查 {} 执行失败: {:#}", check.name, e);
                    self.metrics
                        .record_check(FUNC_CHECK, &self.endpoint_name, &check.name, false);
                }
            }
            *last_run = Instant::now();
        }

        self.soonest_due(last_checks)
    }

    /// 所有检查中最早的到期时刻
    fn soonest_due(&self, last_checks: &[Instant]) -> Instant {
        self.checks
            .iter()
            .zip(last_checks)
            .map(|(check, last_run)| deadline_after(*last_run, check.interval))
            .min()
            .unwrap_or_else(|| deadline_after(Instant::now(), self.refresh_interval))
    }

    /// 刷新端点，失败不会终止工作者
    async fn refresh(&mut self) {
        debug!("刷新探测端点");
        match self.endpoint.refresh().await {
            Ok(()) => {
                self.metrics
                    .record_endpoint_op(FUNC_REFRESH, &self.endpoint_name, true);
            }
            Err(e) => {
                error!("刷新端点失败: {:#}", e);
                self.metrics
                    .record_endpoint_op(FUNC_REFRESH, &self.endpoint_name, false);
            }
        }
    }

    /// 对每个检查调用清理函数，单个失败不影响其余检查
    async fn teardown(&mut self) {
        for check in &self.checks {
            match (check.teardown_fn)(self.endpoint.as_mut()).await {
                Ok(()) => {
                    self.metrics
                        .record_check(FUNC_TEARDOWN, &self.endpoint_name, &check.name, true);
                }
                Err(e) => {
                    error!("清理检查 {} 失败: {:#}", check.name, e);
                    self.metrics
                        .record_check(FUNC_TEARDOWN, &self.endpoint_name, &check.name, false);
                }
            }
        }
    }
}
