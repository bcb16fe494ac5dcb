//! Prometheus指标模块
//!
//! 汇集调度器、服务发现和探测检查产生的指标，并导出为Prometheus文本格式

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

/// 指标名称前缀
pub const METRIC_PREFIX: &str = "blackbox_prober";

/// 操作延迟直方图的桶（秒）
pub const LATENCY_BUCKETS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// 检查阶段标签：周期性检查
pub const FUNC_CHECK: &str = "check";
/// 检查阶段标签：清理
pub const FUNC_TEARDOWN: &str = "teardown";
/// 端点操作标签：刷新
pub const FUNC_REFRESH: &str = "refresh";

/// Prometheus指标收集器
///
/// 所有计数器都基于原子操作，可以被多个探测工作者同时更新。
#[derive(Clone)]
pub struct MetricsCollector {
    /// 注册表
    registry: Registry,
    /// 调度失败次数（按端点）
    scheduler_failure_total: CounterVec,
    /// 端点操作失败次数
    endpoint_failure_total: CounterVec,
    /// 端点操作成功次数
    endpoint_success_total: CounterVec,
    /// 检查成功次数
    check_success_total: CounterVec,
    /// 检查失败次数
    check_failure_total: CounterVec,
    /// 工作者异常终止次数
    worker_panic_total: CounterVec,
    /// 服务发现失败次数
    discovery_failure_total: Counter,
    /// 探测操作延迟
    op_latency: HistogramVec,
    /// 探测操作失败次数
    op_failures_total: CounterVec,
    /// 构建信息
    build_info: Gauge,
    /// 启动时间
    start_time: Gauge,
}

impl MetricsCollector {
    /// 创建新的指标收集器
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let scheduler_failure_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_failure"),
                "Total number of failures during scheduling",
            ),
            &["endpoint_name"],
        )?;

        let endpoint_failure_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_endpoint_failure"),
                "Total number of failures during scheduling for an endpoint",
            ),
            &["func", "endpoint_name"],
        )?;

        let endpoint_success_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_endpoint_success"),
                "Total number of successful operations during scheduling for an endpoint",
            ),
            &["func", "endpoint_name"],
        )?;

        let check_success_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_check_success"),
                "Total number of successful checks call during scheduling",
            ),
            &["func", "endpoint_name", "check_name"],
        )?;

        let check_failure_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_check_failure"),
                "Total number of check failures during scheduling",
            ),
            &["func", "endpoint_name", "check_name"],
        )?;

        let worker_panic_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_scheduler_worker_panic"),
                "Total number of probing workers terminated by a panic",
            ),
            &["endpoint_name"],
        )?;

        let discovery_failure_total = Counter::new(
            format!("{METRIC_PREFIX}_discovery_failure"),
            "Total number of failures during discovery",
        )?;

        let op_latency = HistogramVec::new(
            HistogramOpts::new(
                format!("{METRIC_PREFIX}_tcp_op_latency"),
                "Latency for operations",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation", "endpoint", "cluster"],
        )?;

        let op_failures_total = CounterVec::new(
            Opts::new(
                format!("{METRIC_PREFIX}_tcp_op_latency_failures"),
                "Total number of operations that resulted in failure",
            ),
            &["operation", "endpoint", "cluster"],
        )?;

        let build_info = Gauge::with_opts(
            Opts::new(
                format!("{METRIC_PREFIX}_build_info"),
                "Build information about blackbox-prober",
            )
            .const_label("version", crate::VERSION),
        )?;

        let start_time = Gauge::new(
            format!("{METRIC_PREFIX}_start_time_seconds"),
            "Start time of the prober process since unix epoch in seconds",
        )?;

        // 注册所有指标
        registry.register(Box::new(scheduler_failure_total.clone()))?;
        registry.register(Box::new(endpoint_failure_total.clone()))?;
        registry.register(Box::new(endpoint_success_total.clone()))?;
        registry.register(Box::new(check_success_total.clone()))?;
        registry.register(Box::new(check_failure_total.clone()))?;
        registry.register(Box::new(worker_panic_total.clone()))?;
        registry.register(Box::new(discovery_failure_total.clone()))?;
        registry.register(Box::new(op_latency.clone()))?;
        registry.register(Box::new(op_failures_total.clone()))?;
        registry.register(Box::new(build_info.clone()))?;
        registry.register(Box::new(start_time.clone()))?;

        build_info.set(1.0);
        start_time.set(chrono::Utc::now().timestamp() as f64);

        Ok(Self {
            registry,
            scheduler_failure_total,
            endpoint_failure_total,
            endpoint_success_total,
            check_success_total,
            check_failure_total,
            worker_panic_total,
            discovery_failure_total,
            op_latency,
            op_failures_total,
            build_info,
            start_time,
        })
    }

    /// 记录一次端点启动失败
    pub fn record_scheduler_failure(&self, endpoint_name: &str) {
        self.scheduler_failure_total
            .with_label_values(&[endpoint_name])
            .inc();
    }

    /// 记录一次端点操作结果（例如刷新）
    pub fn record_endpoint_op(&self, func: &str, endpoint_name: &str, success: bool) {
        let counter = if success {
            &self.endpoint_success_total
        } else {
            &self.endpoint_failure_total
        };
        counter.with_label_values(&[func, endpoint_name]).inc();
    }

    /// 记录一次检查函数调用结果
    pub fn record_check(&self, func: &str, endpoint_name: &str, check_name: &str, success: bool) {
        let counter = if success {
            &self.check_success_total
        } else {
            &self.check_failure_total
        };
        counter
            .with_label_values(&[func, endpoint_name, check_name])
            .inc();
    }

    /// 记录一次工作者异常终止
    pub fn record_worker_panic(&self, endpoint_name: &str) {
        self.worker_panic_total
            .with_label_values(&[endpoint_name])
            .inc();
    }

    /// 记录一次服务发现失败
    pub fn record_discovery_failure(&self) {
        self.discovery_failure_total.inc();
    }

    /// 记录一次探测操作的延迟和结果
    ///
    /// 成功时也会创建失败计数序列，保证该序列始终存在。
    pub fn observe_op_latency(
        &self,
        operation: &str,
        endpoint: &str,
        cluster: &str,
        seconds: f64,
        success: bool,
    ) {
        let labels = [operation, endpoint, cluster];
        self.op_latency.with_label_values(&labels).observe(seconds);
        let failures = self.op_failures_total.with_label_values(&labels);
        if success {
            failures.inc_by(0.0);
        } else {
            failures.inc();
        }
    }

    /// 某个端点的调度失败次数
    pub fn scheduler_failure_count(&self, endpoint_name: &str) -> u64 {
        self.scheduler_failure_total
            .with_label_values(&[endpoint_name])
            .get() as u64
    }

    /// 某个端点操作的成功或失败次数
    pub fn endpoint_op_count(&self, func: &str, endpoint_name: &str, success: bool) -> u64 {
        let counter = if success {
            &self.endpoint_success_total
        } else {
            &self.endpoint_failure_total
        };
        counter.with_label_values(&[func, endpoint_name]).get() as u64
    }

    /// 某个检查的成功或失败次数
    pub fn check_count(&self, func: &str, endpoint_name: &str, check_name: &str, success: bool) -> u64 {
        let counter = if success {
            &self.check_success_total
        } else {
            &self.check_failure_total
        };
        counter
            .with_label_values(&[func, endpoint_name, check_name])
            .get() as u64
    }

    /// 某个端点的工作者异常终止次数
    pub fn worker_panic_count(&self, endpoint_name: &str) -> u64 {
        self.worker_panic_total
            .with_label_values(&[endpoint_name])
            .get() as u64
    }

    /// 服务发现失败次数
    pub fn discovery_failure_count(&self) -> u64 {
        self.discovery_failure_total.get() as u64
    }

    /// 某个探测操作的失败次数
    pub fn op_failure_count(&self, operation: &str, endpoint: &str, cluster: &str) -> u64 {
        self.op_failures_total
            .with_label_values(&[operation, endpoint, cluster])
            .get() as u64
    }

    /// 获取Prometheus格式的指标
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("build_info", &self.build_info.get())
            .field("start_time", &self.start_time.get())
            .finish_non_exhaustive()
    }
}
