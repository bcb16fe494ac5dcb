//! 可探测端点抽象
//!
//! 每一个被监控的目标（整个集群或集群中的单个节点）都实现 [`ProbeableEndpoint`]。

use async_trait::async_trait;
use std::any::Any;
use std::fmt;

/// 可被探测的端点
///
/// `hash_key` 是端点的唯一且稳定的标识，拓扑比较和工作者查找都只依赖它；
/// 没有反映到哈希里的字段变化在拓扑比较中不可见。
///
/// 同一个端点实例的 `connect`/`refresh`/`close` 以及检查函数永远不会被并发调用，
/// 因此实现不需要内部同步。
#[async_trait]
pub trait ProbeableEndpoint: Send + Sync + 'static {
    /// 用于比较两个端点的哈希（拓扑更新时使用）
    fn hash_key(&self) -> String;

    /// 端点名称，用于指标和日志
    fn name(&self) -> String;

    /// 集群级端点返回 true，节点级端点返回 false
    fn is_cluster(&self) -> bool;

    /// 初始化到远端数据库的连接
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// 刷新端点状态，例如发现新的表、命名空间或节点
    async fn refresh(&mut self) -> anyhow::Result<()>;

    /// 关闭到远端数据库的所有连接
    async fn close(&mut self) -> anyhow::Result<()>;

    /// 复制一个尚未连接的端点实例
    ///
    /// 拓扑快照只描述期望状态，每个工作者持有自己的实例。
    fn clone_box(&self) -> Box<dyn ProbeableEndpoint>;

    /// 供检查函数向下转型到具体端点类型
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn ProbeableEndpoint> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for dyn ProbeableEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeableEndpoint")
            .field("name", &self.name())
            .field("hash", &self.hash_key())
            .field("is_cluster", &self.is_cluster())
            .finish()
    }
}

/// 将通用端点转换为具体类型，类型不匹配时返回错误
pub fn downcast_endpoint<E: ProbeableEndpoint>(
    endpoint: &mut dyn ProbeableEndpoint,
) -> anyhow::Result<&mut E> {
    let name = endpoint.name();
    endpoint.as_any_mut().downcast_mut::<E>().ok_or_else(|| {
        anyhow::anyhow!(
            "端点 {} 不是 {} 类型",
            name,
            std::any::type_name::<E>()
        )
    })
}

/// 不做任何事情的端点，用于测试
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyEndpoint {
    /// 端点名称
    pub name: String,
    /// 端点哈希
    pub hash: String,
    /// 是否为集群级端点
    pub cluster: bool,
}

impl DummyEndpoint {
    /// 创建节点级的空端点
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            cluster: false,
        }
    }

    /// 创建集群级的空端点
    pub fn cluster(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            cluster: true,
            ..Self::new(name, hash)
        }
    }
}

#[async_trait]
impl ProbeableEndpoint for DummyEndpoint {
    fn hash_key(&self) -> String {
        self.hash.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_cluster(&self) -> bool {
        self.cluster
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn refresh(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ProbeableEndpoint> {
        Box::new(self.clone())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_endpoint() {
        let mut endpoint: Box<dyn ProbeableEndpoint> =
            Box::new(DummyEndpoint::cluster("cluster1", "hash1"));

        let dummy = downcast_endpoint::<DummyEndpoint>(endpoint.as_mut()).unwrap();
        assert_eq!(dummy.hash, "hash1");
        assert!(dummy.cluster);
    }

    #[test]
    fn test_boxed_endpoint_clone_keeps_identity() {
        let endpoint: Box<dyn ProbeableEndpoint> = Box::new(DummyEndpoint::new("node1", "h1"));
        let cloned = endpoint.clone();

        assert_eq!(cloned.hash_key(), "h1");
        assert_eq!(cloned.name(), "node1");
        assert!(!cloned.is_cluster());
    }
}
