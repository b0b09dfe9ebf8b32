//! 健康检查和配置 API
//!
//! 包含 /ping, /config, /status/:port 端点

use axum::{
    extract::{rejection::PathRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 配置响应
#[derive(Debug, Serialize)]
struct ConfigResponse {
    success: bool,
    url: Option<String>,
    appium_port: u16,
    port: u16,
    proxy_port: u16,
    #[serde(rename = "accountAPI")]
    account_api: Option<String>,
}

/// 端口探测响应
#[derive(Debug, Serialize)]
struct PortStatusResponse {
    success: bool,
    connected: bool,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(ping))
        .route("/config", get(get_config))
        .route("/status/:port", get(port_status))
}

/// 存活探测
///
/// GET /ping
async fn ping(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();
    Json(serde_json::json!({
        "success": true,
        "version": VERSION,
        "uptime_secs": uptime,
    }))
}

/// 当前配置与隧道 URL
///
/// GET /config
async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        success: true,
        url: state.tunnel.public_url().await,
        appium_port: state.config.appium_port,
        port: state.config.port,
        proxy_port: state.config.proxy_port,
        account_api: state.config.account_api.clone(),
    })
}

/// 探测本机端口上的服务是否在线
///
/// GET /status/:port
/// 控制 API 与代理端口本身不允许探测
async fn port_status(
    State(state): State<Arc<AppState>>,
    port: Result<Path<u16>, PathRejection>,
) -> ApiResult<Json<PortStatusResponse>> {
    let Path(port) = port?;
    if state.config.is_reserved_port(port) {
        return Err(ApiError::bad_request("Port checking not allowed"));
    }

    let connected = state.service_alive(port).await;

    Ok(Json(PortStatusResponse {
        success: connected,
        connected,
    }))
}
