//! 统一错误处理
//!
//! 提供 `ApiError` 枚举实现 `IntoResponse`，控制 API 和代理共用同一错误体

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 403 - Bearer token 缺失或不匹配
    Forbidden,
    /// 400 - 请求无效
    BadRequest(String),
    /// 500 - 内部错误 / 远端服务失败
    Internal {
        message: String,
        details: Option<String>,
    },
    /// 502 - 上游不可达
    BadGateway {
        message: String,
        details: Option<String>,
    },
}

impl ApiError {
    /// 创建鉴权失败错误
    pub fn forbidden() -> Self {
        Self::Forbidden
    }

    /// 创建请求无效错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            details: None,
        }
    }

    /// 创建上游错误
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::BadGateway {
            message: message.into(),
            details: None,
        }
    }

    /// 附加调试信息
    pub fn with_details(self, extra: impl Into<String>) -> Self {
        match self {
            Self::Internal { message, .. } => Self::Internal {
                message,
                details: Some(extra.into()),
            },
            Self::BadGateway { message, .. } => Self::BadGateway {
                message,
                details: Some(extra.into()),
            },
            other => other,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Forbidden => (StatusCode::FORBIDDEN, ErrorResponse::new("Unauthorized")),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorResponse::new(msg)),
            ApiError::Internal { message, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse { details, ..ErrorResponse::new(message) },
            ),
            ApiError::BadGateway { message, details } => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse { details, ..ErrorResponse::new(message) },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Forbidden => write!(f, "Unauthorized"),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Internal { message, .. } => write!(f, "Internal error: {}", message),
            ApiError::BadGateway { message, .. } => write!(f, "Bad gateway: {}", message),
        }
    }
}

impl std::error::Error for ApiError {}

/// 请求体不是合法 JSON（或缺少 content-type）
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// 路径参数无法解析
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
