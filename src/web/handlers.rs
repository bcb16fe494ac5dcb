//! Web 路由处理函数

use super::WebAppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use tracing::error;

/// Prometheus 文本格式的内容类型
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// 指标端点处理函数
pub async fn metrics(State(app_state): State<WebAppState>) -> impl IntoResponse {
    match app_state.metrics.gather_metrics() {
        Ok(body) => ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!("生成指标失败: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "生成指标失败").into_response()
        }
    }
}

/// 就绪检查处理函数
pub async fn ready() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}
