//! 探测调度模块
//!
//! 将拓扑快照调和为每个端点一个的探测工作者

pub mod check;
pub mod probing;
pub mod worker;

pub use check::{noop, Check, CheckFn};
pub use probing::{ProbingScheduler, DEFAULT_SHUTDOWN_TIMEOUT};
pub use worker::{ProberWorker, DEFAULT_REFRESH_INTERVAL};
