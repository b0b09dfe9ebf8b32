//! 设备 API
//!
//! 包含 /devices, /view/:device_id 端点

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::domain::device::Device;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// 设备列表响应
#[derive(Debug, Serialize)]
struct DevicesResponse {
    success: bool,
    devices: Vec<Device>,
}

/// 创建设备路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/view/:device_id", get(view_device))
}

/// 发现设备
///
/// GET /devices
/// 结果异步上报账户服务，上报失败不影响响应
async fn list_devices(State(state): State<Arc<AppState>>) -> ApiResult<Json<DevicesResponse>> {
    let devices = state.discovery.list_devices().await.map_err(|e| {
        error!(error = %e, "Device discovery failed");
        ApiError::internal("Error fetching devices").with_details(e.to_string())
    })?;

    let account = state.account.clone();
    let report = devices.clone();
    tokio::spawn(async move {
        if let Err(e) = account.report_devices(&report).await {
            warn!(error = %e, "Failed to report devices to account service");
        }
    });

    Ok(Json(DevicesResponse {
        success: true,
        devices,
    }))
}

/// 打开设备投屏（scrcpy）
///
/// GET /view/:device_id
/// 进程启动即返回，不等待其结束
async fn view_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if device_id.trim().is_empty() || device_id.starts_with('-') {
        return Err(ApiError::bad_request(format!("Invalid device id: {}", device_id)));
    }

    let args = vec!["-s".to_string(), device_id.clone()];
    state
        .executor
        .spawn_detached(&state.tools.scrcpy, &args)
        .map_err(|e| {
            error!(device = %device_id, error = %e, "Failed to launch scrcpy");
            ApiError::internal(e.to_string())
        })?;

    Ok(Json(serde_json::json!({ "success": true })))
}
