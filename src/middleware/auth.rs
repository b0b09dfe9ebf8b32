//! Bearer token 认证
//!
//! 提供 `RequireBearer` extractor，代理入口的唯一鉴权点

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::{HeaderMap, AUTHORIZATION}, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::proxy::ProxyState;

/// Bearer token 认证 Extractor
///
/// 代理 handler 的第一个参数，校验失败时请求不会被转发
///
/// # Example
///
/// ```ignore
/// async fn forward(
///     _auth: RequireBearer,
///     State(state): State<Arc<ProxyState>>,
///     request: Request<Body>,
/// ) -> Response {
///     // 转发逻辑...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireBearer;

#[async_trait]
impl FromRequestParts<Arc<ProxyState>> for RequireBearer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ProxyState>,
    ) -> Result<Self, Self::Rejection> {
        verify_bearer(&parts.headers, &state.shared_secret)
    }
}

/// 验证 Bearer token
///
/// `Authorization` 必须与 `"Bearer " + secret` 完全一致
pub fn verify_bearer(headers: &HeaderMap, secret: &str) -> Result<RequireBearer, ApiError> {
    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(value) if matches_bearer(value, secret) => Ok(RequireBearer),
        Some(_) => {
            tracing::warn!("Invalid bearer token provided");
            Err(ApiError::forbidden())
        }
        None => {
            tracing::warn!("Missing authorization header");
            Err(ApiError::forbidden())
        }
    }
}

fn matches_bearer(value: &str, secret: &str) -> bool {
    value.strip_prefix("Bearer ") == Some(secret)
}
