//! 探测调度器
//!
//! 接收完整的拓扑快照，与上一次提交的拓扑比较，停止消失的端点的工作者并为新端点启动工作者。
//! 所有调和过程都在调度器自己的任务中串行执行。

use crate::error::SchedulerError;
use crate::metrics::MetricsCollector;
use crate::scheduler::check::Check;
use crate::scheduler::worker::{ProberWorker, DEFAULT_REFRESH_INTERVAL};
use crate::topology::{ClusterMap, ProbeableEndpoint};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// 默认的关闭等待时间
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// 正在运行的工作者的控制句柄
struct WorkerHandle {
    /// 停止信号发送器（容量为1，发送永不阻塞）
    control_tx: mpsc::Sender<()>,
    /// 工作者任务句柄
    join: JoinHandle<()>,
}

/// 探测调度器
pub struct ProbingScheduler {
    /// 最后一次成功提交的拓扑
    current_topology: ClusterMap,
    /// 拓扑更新接收器
    topology_rx: mpsc::Receiver<ClusterMap>,
    /// 端点哈希 -> 工作者控制句柄
    worker_control: HashMap<String, WorkerHandle>,
    /// 集群级检查
    cluster_checks: Vec<Check>,
    /// 节点级检查
    node_checks: Vec<Check>,
    /// 工作者刷新端点的间隔
    refresh_interval: Duration,
    /// 关闭时等待工作者清理的最长时间
    shutdown_timeout: Duration,
    /// 指标收集器
    metrics: Arc<MetricsCollector>,
}

impl ProbingScheduler {
    /// 创建新的探测调度器
    ///
    /// # 参数
    /// * `topology_rx` - 拓扑快照接收器，每条消息都完整替换之前的期望状态
    /// * `metrics` - 指标收集器
    pub fn new(topology_rx: mpsc::Receiver<ClusterMap>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            current_topology: ClusterMap::new(),
            topology_rx,
            worker_control: HashMap::new(),
            cluster_checks: Vec::new(),
            node_checks: Vec::new(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            metrics,
        }
    }

    /// 设置端点刷新间隔
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// 设置关闭等待时间
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// 注册集群级检查，必须在启动前调用
    pub fn register_new_cluster_check(&mut self, check: Check) {
        info!("注册集群检查: {}", check.name);
        self.cluster_checks.push(check);
    }

    /// 注册节点级检查，必须在启动前调用
    pub fn register_new_node_check(&mut self, check: Check) {
        info!("注册节点检查: {}", check.name);
        self.node_checks.push(check);
    }

    /// 最后一次成功提交的拓扑
    pub fn current_topology(&self) -> &ClusterMap {
        &self.current_topology
    }

    /// 正在运行的工作者数量
    pub fn running_workers(&self) -> usize {
        self.worker_control
            .values()
            .filter(|h| !h.join.is_finished())
            .count()
    }

    /// 指定哈希的端点是否有正在运行的工作者
    pub fn is_running(&self, hash: &str) -> bool {
        self.worker_control
            .get(hash)
            .is_some_and(|h| !h.join.is_finished())
    }

    /// 运行调度循环，直到收到关闭信号或拓扑通道关闭，退出前停止所有工作者
    pub async fn start(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "探测调度器已启动，集群检查 {} 个，节点检查 {} 个",
            self.cluster_checks.len(),
            self.node_checks.len()
        );

        loop {
            // 只在等待快照时响应关闭信号，进行中的调和不会被打断
            let snapshot = tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止探测调度器");
                    break;
                }
                snapshot = self.topology_rx.recv() => snapshot,
            };

            match snapshot {
                Some(new_topology) => {
                    self.reconcile(new_topology).await;
                }
                None => {
                    warn!("拓扑通道已关闭，停止探测调度器");
                    break;
                }
            }
        }

        let timeout = self.shutdown_timeout;
        self.shutdown(timeout).await;
    }

    /// 等待一个拓扑快照并完成一次调和
    ///
    /// 拓扑通道关闭时返回 `false`。
    pub async fn manage_probes(&mut self) -> bool {
        match self.topology_rx.recv().await {
            Some(new_topology) => {
                self.reconcile(new_topology).await;
                true
            }
            None => false,
        }
    }

    /// 将运行中的工作者调整为与新拓扑一致
    ///
    /// 只有在所有新端点都启动成功时才提交新拓扑，返回是否已提交。
    /// 未提交时失败的端点会在下一个快照中再次被视为新端点并重试。
    pub async fn reconcile(&mut self, new_topology: ClusterMap) -> bool {
        self.reap_finished_workers();

        let (to_stop, mut to_start) = self.current_topology.diff(&new_topology);
        to_start.extend(self.endpoints_without_worker(&new_topology));
        debug!(
            "拓扑变化: 停止 {} 个端点，启动 {} 个端点",
            to_stop.len(),
            to_start.len()
        );

        for endpoint in &to_stop {
            // 已经退出的工作者在上面被清理掉了，不需要再停止
            if self.worker_control.contains_key(&endpoint.hash_key()) {
                self.stop_worker_for_endpoint(endpoint.as_ref());
            }
        }

        let mut had_failure = false;
        for endpoint in to_start {
            let checks = if endpoint.is_cluster() {
                self.cluster_checks.clone()
            } else {
                self.node_checks.clone()
            };

            if checks.is_empty() {
                info!(
                    "端点 {} 没有可用的检查，跳过",
                    endpoint.name()
                );
                continue;
            }

            let name = endpoint.name();
            if let Err(e) = self.start_new_worker(endpoint, checks).await {
                error!("启动端点 {} 的探测失败: {}", name, e);
                self.metrics.record_scheduler_failure(&name);
                had_failure = true;
            }
        }

        if had_failure {
            warn!("本次调和存在失败，拓扑未提交，将在下一个快照中重试");
            return false;
        }

        self.current_topology = new_topology;
        true
    }

    /// 移除已经自行退出的工作者（例如检查函数 panic），让它们的端点可以被重新启动
    fn reap_finished_workers(&mut self) {
        self.worker_control.retain(|hash, handle| {
            if handle.join.is_finished() {
                warn!("端点 {} 的探测工作者已意外退出，将重新启动", hash);
                false
            } else {
                true
            }
        });
    }

    /// 已提交拓扑和新拓扑中都存在、但没有工作者的端点
    ///
    /// 这些端点的工作者意外退出过，diff 不会再把它们列为新端点。
    fn endpoints_without_worker(
        &self,
        new_topology: &ClusterMap,
    ) -> Vec<Box<dyn ProbeableEndpoint>> {
        let committed = self.current_topology.endpoint_hashes();
        new_topology
            .clusters
            .values()
            .flat_map(|cluster| cluster.all_endpoints())
            .filter(|endpoint| {
                let hash = endpoint.hash_key();
                let has_checks = if endpoint.is_cluster() {
                    !self.cluster_checks.is_empty()
                } else {
                    !self.node_checks.is_empty()
                };
                has_checks && committed.contains(&hash) && !self.worker_control.contains_key(&hash)
            })
            .cloned()
            .collect()
    }

    /// 向端点的工作者发送停止信号，不等待工作者结束
    pub fn stop_worker_for_endpoint(&mut self, endpoint: &dyn ProbeableEndpoint) {
        let hash = endpoint.hash_key();
        match self.worker_control.remove(&hash) {
            Some(handle) => {
                info!("停止端点 {} 的探测", endpoint.name());
                match handle.control_tx.try_send(()) {
                    // 容量为1的通道，已有未处理的停止信号时忽略即可
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Closed(())) => {
                        warn!("端点 {} 的探测工作者已经退出", endpoint.name());
                    }
                }
            }
            None => {
                error!(
                    "无法停止端点 {} 的探测: 找不到哈希为 {} 的工作者",
                    endpoint.name(),
                    hash
                );
            }
        }
    }

    /// 为端点启动新的工作者
    ///
    /// 在调度器任务中同步完成连接和准备，失败时关闭端点并返回错误，不会留下任何注册项。
    /// 端点已有工作者时返回 `Ok(false)`。
    pub async fn start_new_worker(
        &mut self,
        endpoint: Box<dyn ProbeableEndpoint>,
        checks: Vec<Check>,
    ) -> Result<bool, SchedulerError> {
        let hash = endpoint.hash_key();
        if self.worker_control.contains_key(&hash) {
            info!("端点 {} 的探测已在运行", endpoint.name());
            return Ok(false);
        }

        let span = info_span!(
            "prober_worker",
            endpoint_name = %endpoint.name(),
            endpoint_hash = %hash
        );

        let (control_tx, control_rx) = mpsc::channel(1);
        let mut worker = ProberWorker::new(
            endpoint,
            checks,
            control_rx,
            self.refresh_interval,
            Arc::clone(&self.metrics),
        );

        let init_result = async {
            worker.connect().await?;
            worker.prepare_probing().await
        }
        .instrument(span.clone())
        .await;

        if let Err(e) = init_result {
            worker.close_endpoint().instrument(span).await;
            return Err(e);
        }

        let join = tokio::spawn(worker.start_probing().instrument(span));
        self.worker_control
            .insert(hash, WorkerHandle { control_tx, join });
        Ok(true)
    }

    /// 停止所有工作者并等待它们完成清理
    ///
    /// 超过 `timeout` 仍未结束的工作者会被放弃等待。
    pub async fn shutdown(&mut self, timeout: Duration) {
        if self.worker_control.is_empty() {
            return;
        }

        info!("正在停止 {} 个探测工作者", self.worker_control.len());
        let handles: Vec<WorkerHandle> = self.worker_control.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            let _ = handle.control_tx.try_send(());
        }

        let joins = futures::future::join_all(handles.into_iter().map(|h| h.join));
        match tokio::time::timeout(timeout, joins).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("探测工作者异常退出: {}", e);
                    }
                }
                info!("所有探测工作者已停止");
            }
            Err(_) => {
                warn!("等待探测工作者停止超时 ({:?})", timeout);
            }
        }
    }
}

impl std::fmt::Debug for ProbingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbingScheduler")
            .field("running_workers", &self.worker_control.len())
            .field("cluster_checks", &self.cluster_checks)
            .field("node_checks", &self.node_checks)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}
