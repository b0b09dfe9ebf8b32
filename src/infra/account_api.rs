//! 账户服务 HTTP Client
//!
//! 封装与远端账户服务的所有 HTTP 交互，复用连接池

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::device::{Device, DeviceReport};

/// 账户服务错误
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    /// 远端明确返回非成功
    #[error("{message}")]
    Rejected {
        message: String,
        http_status: u16,
        body: Option<Value>,
    },

    /// 网络错误或远端不可达
    #[error("Account service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RemoteServiceError {
    /// 调试信息（远端原始响应）
    pub fn details(&self) -> Option<String> {
        match self {
            RemoteServiceError::Rejected { body: Some(body), .. } => Some(body.to_string()),
            RemoteServiceError::Rejected { http_status, .. } => {
                Some(format!("HTTP {}", http_status))
            }
            RemoteServiceError::Transport(e) => e.url().map(|u| u.to_string()),
        }
    }
}

/// 账户服务对 /connect 的应答
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectReply {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

#[derive(Serialize)]
struct DevicesPing<'a> {
    devices: Vec<DeviceReport<'a>>,
}

/// 账户服务客户端
#[derive(Clone)]
pub struct AccountClient {
    client: Client,
    base_url: String,
}

impl AccountClient {
    /// 创建新的账户服务客户端
    ///
    /// # Arguments
    /// * `base_url` - 账户服务基础 URL（不带结尾 `/`）
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// 连接握手
    ///
    /// 只有远端返回 `status == "success"` 才视为成功
    pub async fn connect(&self, body: &Value) -> Result<ConnectReply, RemoteServiceError> {
        let url = format!("{}/connect", self.base_url);
        let response = self.client.post(&url).json(body).send().await?;

        let http_status = response.status();
        let raw: Option<Value> = response.json().await.ok();
        let reply = raw
            .clone()
            .and_then(|v| serde_json::from_value::<ConnectReply>(v).ok());

        match reply {
            Some(reply) if http_status.is_success() && reply.is_success() => {
                info!(status = %http_status, "Account service accepted connect");
                Ok(reply)
            }
            reply => {
                let message = reply
                    .and_then(|r| r.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Server error".to_string());
                warn!(status = %http_status, message = %message, "Account service rejected connect");
                Err(RemoteServiceError::Rejected {
                    message,
                    http_status: http_status.as_u16(),
                    body: raw,
                })
            }
        }
    }

    /// 上报设备列表（best-effort，调用方只记录失败）
    pub async fn report_devices(&self, devices: &[Device]) -> Result<(), RemoteServiceError> {
        let url = format!("{}/ping/devices", self.base_url);
        let body = DevicesPing {
            devices: devices.iter().map(DeviceReport::from).collect(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&body)
            .send()
            .await?;

        let http_status = response.status();
        if http_status.is_success() {
            info!(devices = devices.len(), "Reported devices to account service");
            Ok(())
        } else {
            Err(RemoteServiceError::Rejected {
                message: format!("Device report rejected: {}", http_status),
                http_status: http_status.as_u16(),
                body: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};

    async fn spawn_account_api(reply: Value, status: axum::http::StatusCode) -> String {
        let app = Router::new()
            .route(
                "/api/connect",
                post(move |Json(_body): Json<Value>| {
                    let reply = reply.clone();
                    async move { (status, Json(reply)) }
                }),
            )
            .route("/api/ping/devices", post(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{}/api", port)
    }

    #[test]
    fn test_connect_reply_success_flag() {
        let reply: ConnectReply =
            serde_json::from_value(serde_json::json!({"status": "success", "token": "x"})).unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.extra["token"], "x");

        let reply: ConnectReply = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!reply.is_success());
    }

    #[tokio::test]
    async fn test_connect_success() {
        let base = spawn_account_api(
            serde_json::json!({"status": "success"}),
            axum::http::StatusCode::OK,
        )
        .await;

        let client = AccountClient::new(base).unwrap();
        let reply = client.connect(&serde_json::json!({"devices": []})).await.unwrap();
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn test_connect_rejected_message() {
        let base = spawn_account_api(
            serde_json::json!({"status": "error", "message": "quota exceeded"}),
            axum::http::StatusCode::OK,
        )
        .await;

        let client = AccountClient::new(base).unwrap();
        let err = client.connect(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(err.details().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_connect_rejected_without_message() {
        let base = spawn_account_api(
            serde_json::json!({"status": "pending"}),
            axum::http::StatusCode::OK,
        )
        .await;

        let client = AccountClient::new(base).unwrap();
        let err = client.connect(&serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Server error");
    }

    #[tokio::test]
    async fn test_connect_http_error_is_rejected() {
        let base = spawn_account_api(
            serde_json::json!({"status": "success"}),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        )
        .await;

        let client = AccountClient::new(base).unwrap();
        let err = client.connect(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteServiceError::Rejected { http_status: 500, .. }));
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let client = AccountClient::new("http://127.0.0.1:1/api").unwrap();
        let err = client.connect(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteServiceError::Transport(_)));
    }

    #[tokio::test]
    async fn test_report_devices() {
        let base = spawn_account_api(serde_json::json!({}), axum::http::StatusCode::OK).await;
        let client = AccountClient::new(base).unwrap();

        let devices = vec![Device::connected("abc", 4729, "Pixel", "14", vec![])];
        assert!(client.report_devices(&devices).await.is_ok());
    }
}
