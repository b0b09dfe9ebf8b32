//! 隧道相关领域模型
//!
//! 纯数据类型，无 tokio/axum 依赖

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

/// 隧道服务提供方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProvider {
    /// cloudflared quick tunnel（*.trycloudflare.com）
    Cloudflare,
    /// ngrok agent
    Ngrok,
}

impl TunnelProvider {
    /// 从字符串解析，未知取值返回 None
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cloudflare" | "cloudflared" => Some(TunnelProvider::Cloudflare),
            "ngrok" => Some(TunnelProvider::Ngrok),
            _ => None,
        }
    }

    /// 可执行文件名
    pub fn binary_name(&self) -> &'static str {
        match self {
            TunnelProvider::Cloudflare => "cloudflared",
            TunnelProvider::Ngrok => "ngrok",
        }
    }

    /// 暴露本地端口所需的命令行参数
    ///
    /// 不含任何凭据，参数会出现在进程列表和隧道日志里
    pub fn launch_args(&self, local_port: u16) -> Vec<String> {
        match self {
            TunnelProvider::Cloudflare => vec![
                "tunnel".to_string(),
                "--url".to_string(),
                format!("http://localhost:{}", local_port),
            ],
            TunnelProvider::Ngrok => vec![
                "http".to_string(),
                local_port.to_string(),
                "--log".to_string(),
                "stdout".to_string(),
                "--log-format".to_string(),
                "logfmt".to_string(),
            ],
        }
    }

    /// 凭据通过环境变量传给隧道进程
    pub fn launch_env(&self, auth_token: Option<&str>) -> Vec<(String, String)> {
        match (self, auth_token) {
            (TunnelProvider::Ngrok, Some(token)) => {
                vec![("NGROK_AUTHTOKEN".to_string(), token.to_string())]
            }
            _ => Vec::new(),
        }
    }

    fn url_pattern(&self) -> &'static Regex {
        static CLOUDFLARE: OnceLock<Regex> = OnceLock::new();
        static NGROK: OnceLock<Regex> = OnceLock::new();

        match self {
            TunnelProvider::Cloudflare => CLOUDFLARE.get_or_init(|| {
                Regex::new(r"https://([a-zA-Z0-9-]+)\.trycloudflare\.com")
                    .expect("static cloudflare url pattern")
            }),
            TunnelProvider::Ngrok => NGROK.get_or_init(|| {
                Regex::new(r"https://([a-zA-Z0-9.-]+)\.ngrok(?:-free)?\.(?:app|io|dev)")
                    .expect("static ngrok url pattern")
            }),
        }
    }

    /// 从一行输出中提取公网 URL
    ///
    /// 跳过提供方自身的 API 主机（如 `api.trycloudflare.com`），它只出现在错误日志里
    pub fn extract_url(&self, line: &str) -> Option<String> {
        self.url_pattern()
            .captures_iter(line)
            .find(|caps| caps.get(1).is_some_and(|sub| !is_api_host(sub.as_str())))
            .and_then(|caps| caps.get(0))
            .map(|m| m.as_str().to_string())
    }
}

fn is_api_host(subdomain: &str) -> bool {
    subdomain.eq_ignore_ascii_case("api") || subdomain.to_ascii_lowercase().starts_with("api.")
}

impl Default for TunnelProvider {
    fn default() -> Self {
        TunnelProvider::Cloudflare
    }
}

/// 隧道会话状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    /// 尚未启动过
    Idle,
    Starting,
    Active,
    /// 主动关闭
    Closed,
    /// 启动失败或进程意外退出
    Failed,
}

impl Default for TunnelState {
    fn default() -> Self {
        TunnelState::Idle
    }
}

/// 隧道状态快照（用于 API 输出）
#[derive(Clone, Debug, Serialize)]
pub struct TunnelStatus {
    pub provider: TunnelProvider,
    pub state: TunnelState,
    pub url: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
