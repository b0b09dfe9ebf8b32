//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod connect;
pub mod devices;
pub mod health;
pub mod tunnel;

use axum::Router;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 构建控制 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health & Config
        .merge(health::router())
        // Devices
        .merge(devices::router())
        // Connect
        .merge(connect::router())
        // Tunnel
        .merge(tunnel::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
