//! 环境变量配置加载

use std::env;

use thiserror::Error;
use tracing::warn;

use crate::domain::tunnel::TunnelProvider;

/// 配置错误（启动即失败，不做静默回退）
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set to a non-empty value")]
    MissingSecret(&'static str),

    #[error("Invalid port in {key}: {value:?}")]
    InvalidPort { key: &'static str, value: String },

    #[error("Unknown tunnel provider {0:?} (expected \"cloudflare\" or \"ngrok\")")]
    UnknownProvider(String),

    #[error("APP_PORT and PROXY_PORT must differ (both {0})")]
    PortConflict(u16),
}

/// 网关配置
///
/// 启动时加载一次，之后只读
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// 控制 API 端口
    pub port: u16,
    /// Appium（自动化服务）端口，代理的唯一上游
    pub appium_port: u16,
    /// 鉴权代理端口
    pub proxy_port: u16,
    /// 共享密钥（代理 Bearer token）
    pub shared_secret: String,
    /// 账户标识，仅通过 /config 回显
    pub account_api: Option<String>,
    /// 账户服务基础 URL
    pub account_api_base_url: String,
    /// 隧道提供方
    pub tunnel_provider: TunnelProvider,
    /// 隧道提供方认证令牌（ngrok authtoken）
    pub tunnel_auth_token: Option<String>,
}

impl GatewayConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意 key/value 来源加载配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_port(&get, "APP_PORT", defaults::APP_PORT)?;
        let appium_port = parse_port(&get, "APPIUM_PORT", defaults::APPIUM_PORT)?;
        let proxy_port = parse_port(&get, "PROXY_PORT", defaults::PROXY_PORT)?;

        if port == proxy_port {
            return Err(ConfigError::PortConflict(port));
        }

        let shared_secret = get("PASSWORD").ok_or(ConfigError::MissingSecret("PASSWORD"))?;

        let account_api = get("ACCOUNT_API");
        let account_api_base_url = get("ACCOUNT_API_BASE_URL")
            .unwrap_or_else(|| defaults::ACCOUNT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let tunnel_provider = match get("TUNNEL_PROVIDER") {
            Some(v) => TunnelProvider::parse(&v).ok_or(ConfigError::UnknownProvider(v))?,
            None => TunnelProvider::default(),
        };

        let tunnel_auth_token = get("TUNNEL_AUTH_TOKEN");
        if tunnel_auth_token.is_some() && tunnel_provider == TunnelProvider::Cloudflare {
            warn!("TUNNEL_AUTH_TOKEN is ignored for cloudflare quick tunnels");
        }

        Ok(Self {
            port,
            appium_port,
            proxy_port,
            shared_secret,
            account_api,
            account_api_base_url,
            tunnel_provider,
            tunnel_auth_token,
        })
    }

    /// 控制 API 与代理端口，禁止通过 /status/:port 探测
    pub fn is_reserved_port(&self, port: u16) -> bool {
        port == self.port || port == self.proxy_port
    }
}

fn parse_port<G>(get: &G, key: &'static str, default: u16) -> Result<u16, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => match value.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort { key, value }),
        },
        None => Ok(default),
    }
}

/// 默认值
pub mod defaults {
    pub const APP_PORT: u16 = 3000;
    pub const APPIUM_PORT: u16 = 4729;
    pub const PROXY_PORT: u16 = 8089;
    pub const ACCOUNT_API_BASE_URL: &str = "https://api.socialfarmy.com/api";
}

/// 常量
pub mod constants {
    use std::time::Duration;

    /// 单次 adb 查询超时
    pub const DEVICE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

    /// 隧道等待公网 URL 的超时
    pub const TUNNEL_START_TIMEOUT: Duration = Duration::from_secs(60);

    /// /status/:port 探测超时
    pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

    /// 代理请求超时（Appium 命令超时为 600 秒）
    pub const PROXY_TIMEOUT: Duration = Duration::from_secs(660);

    /// 代理请求体上限
    pub const PROXY_BODY_LIMIT: usize = 10 * 1024 * 1024;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_secret() {
        let config = load(&[("PASSWORD", "s3cret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.appium_port, 4729);
        assert_eq!(config.proxy_port, 8089);
        assert_eq!(config.shared_secret, "s3cret");
        assert_eq!(config.account_api_base_url, "https://api.socialfarmy.com/api");
        assert_eq!(config.tunnel_provider, TunnelProvider::Cloudflare);
        assert!(config.account_api.is_none());
    }

    #[test]
    fn test_missing_secret_fails() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::MissingSecret("PASSWORD"));
        assert_eq!(
            load(&[("PASSWORD", "   ")]).unwrap_err(),
            ConfigError::MissingSecret("PASSWORD")
        );
    }

    #[test]
    fn test_invalid_port_fails() {
        let err = load(&[("PASSWORD", "x"), ("APPIUM_PORT", "abc")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { key: "APPIUM_PORT", .. }));

        let err = load(&[("PASSWORD", "x"), ("APP_PORT", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { key: "APP_PORT", .. }));
    }

    #[test]
    fn test_port_conflict() {
        let err = load(&[("PASSWORD", "x"), ("APP_PORT", "9000"), ("PROXY_PORT", "9000")])
            .unwrap_err();
        assert_eq!(err, ConfigError::PortConflict(9000));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("PASSWORD", "x"),
            ("APP_PORT", "3100"),
            ("ACCOUNT_API", "acct-42"),
            ("ACCOUNT_API_BASE_URL", "http://localhost:5000/api/"),
            ("TUNNEL_PROVIDER", "ngrok"),
            ("TUNNEL_AUTH_TOKEN", "tok"),
        ])
        .unwrap();

        assert_eq!(config.port, 3100);
        assert_eq!(config.account_api.as_deref(), Some("acct-42"));
        assert_eq!(config.account_api_base_url, "http://localhost:5000/api");
        assert_eq!(config.tunnel_provider, TunnelProvider::Ngrok);
        assert_eq!(config.tunnel_auth_token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_unknown_provider() {
        let err = load(&[("PASSWORD", "x"), ("TUNNEL_PROVIDER", "frp")]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownProvider("frp".to_string()));
    }

    #[test]
    fn test_reserved_ports() {
        let config = load(&[("PASSWORD", "x")]).unwrap();
        assert!(config.is_reserved_port(3000));
        assert!(config.is_reserved_port(8089));
        assert!(!config.is_reserved_port(4729));
    }
}
