//! 连接握手 API
//!
//! POST /connect：先请求账户服务，只有明确成功才启动 Appium

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 连接成功响应
#[derive(Debug, Serialize)]
struct ConnectResponse {
    success: bool,
    message: String,
    #[serde(rename = "ngrokTunnel")]
    tunnel_url: Option<String>,
}

/// 创建连接路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/connect", post(connect))
}

/// 连接握手
///
/// POST /connect
/// 请求体 `{accountAPI, devices, ...}` 原样转发，并附加 port 与隧道 URL
/// Appium 已在端口上运行时不再重复启动
async fn connect(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Json<ConnectResponse>> {
    let Json(mut body) = payload?;
    let tunnel_url = state.tunnel.public_url().await;

    body.insert("port".to_string(), Value::from(state.config.appium_port));
    body.insert(
        "ngrokTunnel".to_string(),
        tunnel_url.clone().map_or(Value::Null, Value::from),
    );

    let reply = state.account.connect(&Value::Object(body)).await.map_err(|e| {
        error!(error = %e, "Connection error");
        let err = ApiError::internal(e.to_string());
        match e.details() {
            Some(details) => err.with_details(details),
            None => err,
        }
    })?;

    info!(message = ?reply.message, "Account service connected");

    if state.service_alive(state.config.appium_port).await {
        info!(port = state.config.appium_port, "Appium already running");
    } else {
        let (program, args) = state.appium_command();
        state
            .executor
            .spawn_detached(&program, &args)
            .map_err(|e| {
                error!(error = %e, "Failed to launch Appium");
                ApiError::internal(format!("Failed to launch Appium: {}", e))
            })?;
    }

    Ok(Json(ConnectResponse {
        success: true,
        message: format!("Appium running on port {}", state.config.appium_port),
        tunnel_url,
    }))
}
