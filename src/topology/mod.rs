//! 拓扑模块
//!
//! 定义可探测端点抽象以及集群拓扑快照和差异计算

pub mod cluster;
pub mod endpoint;

// 重新导出主要类型
pub use cluster::{Cluster, ClusterMap};
pub use endpoint::{downcast_endpoint, DummyEndpoint, ProbeableEndpoint};
