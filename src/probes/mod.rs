//! 探测实现
//!
//! 具体的端点类型和检查函数

pub mod tcp;

pub use tcp::{
    availability_check, latency_check, register_checks, topology_builder, ClusterMembers,
    TcpEndpoint, AVAILABILITY_CHECK, LATENCY_CHECK,
};
