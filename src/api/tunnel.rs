//! 隧道 API
//!
//! 包含 /tunnel/* 端点

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::tunnel::TunnelStatus;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 创建隧道管理路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tunnel/status", get(get_tunnel_status))
        .route("/tunnel/start", post(start_tunnel))
        .route("/tunnel/stop", post(stop_tunnel))
        .route("/tunnel/logs", get(tunnel_logs))
}

/// 获取隧道状态
///
/// GET /tunnel/status
async fn get_tunnel_status(State(state): State<Arc<AppState>>) -> Json<TunnelStatus> {
    Json(state.tunnel.status().await)
}

/// 启动隧道（已在运行时直接返回当前 URL）
///
/// POST /tunnel/start
async fn start_tunnel(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let url = state
        .tunnel
        .start()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "success": true, "url": url })))
}

/// 关闭隧道，幂等
///
/// POST /tunnel/stop
async fn stop_tunnel(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.tunnel.stop().await;
    Json(serde_json::json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    tail: Option<usize>,
}

/// 隧道进程输出
///
/// GET /tunnel/logs?tail=100
async fn tunnel_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let lines = state.tunnel.tail_logs(query.tail.unwrap_or(100)).await;
    Json(serde_json::json!({ "lines": lines }))
}

#[cfg(all(test, unix))]
mod tests {
    use crate::api::test_support::{call, test_state};
    use crate::services::discovery::tests::FakeExecutor;
    use axum::http::{Method, StatusCode};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tunnel_lifecycle_over_http() {
        let state = test_state(Arc::new(FakeExecutor::default()), "http://127.0.0.1:1/api");

        let (_, json) = call(&state, Method::GET, "/tunnel/status", None).await;
        assert_eq!(json["state"], "idle");
        assert_eq!(json["provider"], "cloudflare");

        let (resp, json) = call(&state, Method::POST, "/tunnel/start", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json["url"], "https://abcd-1234.trycloudflare.com");

        let (_, json) = call(&state, Method::GET, "/tunnel/status", None).await;
        assert_eq!(json["state"], "active");

        let (_, json) = call(&state, Method::GET, "/tunnel/logs?tail=10", None).await;
        assert!(!json["lines"].as_array().unwrap().is_empty());

        for _ in 0..2 {
            let (resp, json) = call(&state, Method::POST, "/tunnel/stop", None).await;
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(json["success"], true);
        }

        let (_, json) = call(&state, Method::GET, "/tunnel/status", None).await;
        assert_eq!(json["state"], "closed");
        assert!(json["url"].is_null());
    }
}
