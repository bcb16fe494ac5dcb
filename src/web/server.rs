//! Web服务器实现

use super::{handlers, WebAppState};
use crate::error::Result;
use crate::metrics::MetricsCollector;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 创建路由
pub fn create_router(metrics: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/ready", get(handlers::ready))
        .layer(TraceLayer::new_for_http())
        .with_state(WebAppState::new(metrics))
}

/// 指标HTTP服务器
#[derive(Debug)]
pub struct MetricsServer {
    /// 监听地址
    addr: SocketAddr,
    /// 指标收集器
    metrics: Arc<MetricsCollector>,
}

impl MetricsServer {
    /// 创建新的指标服务器
    pub fn new(addr: SocketAddr, metrics: Arc<MetricsCollector>) -> Self {
        Self { addr, metrics }
    }

    /// 绑定监听地址
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(self.addr).await?)
    }

    /// 在已绑定的监听器上提供服务，直到收到关闭信号
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("指标服务器已启动，监听地址: {}", local_addr);

        let app = create_router(self.metrics);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("指标服务器正在关闭");
            })
            .await?;

        Ok(())
    }

    /// 绑定并启动服务器
    pub async fn start(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    fn metrics() -> Arc<MetricsCollector> {
        Arc::new(MetricsCollector::new().unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = metrics();
        collector.record_scheduler_failure("cluster-a");
        let app = create_router(collector);

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            handlers::METRICS_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("blackbox_prober_build_info"));
        assert!(body.contains("blackbox_prober_scheduler_failure{endpoint_name=\"cluster-a\"} 1"));
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let app = create_router(metrics());

        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_router(metrics());

        let response = app
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_serves_and_shuts_down() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap(), metrics());
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(server.serve(listener, shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /ready HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("服务器未关闭")
            .unwrap()
            .unwrap();
    }
}
