//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    env::{
        constants::{DEVICE_QUERY_TIMEOUT, PORT_PROBE_TIMEOUT},
        GatewayConfig,
    },
    tools::ToolPaths,
};
use crate::infra::{AccountClient, CommandExecutor};
use crate::services::{discovery::DeviceDiscovery, tunnel::TunnelManager};

/// 控制 API 的共享状态
///
/// 配置只读；隧道会话由 `TunnelManager` 独占，这里只持有句柄
pub struct AppState {
    // ========== 核心配置 ==========
    /// 网关配置
    pub config: GatewayConfig,
    /// 外部工具路径
    pub tools: ToolPaths,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 服务 ==========
    /// 设备发现
    pub discovery: DeviceDiscovery,
    /// 隧道管理器
    pub tunnel: Arc<TunnelManager>,
    /// 外部命令执行（scrcpy / appium）
    pub executor: Arc<dyn CommandExecutor>,

    // ========== 外部服务 ==========
    /// 账户服务客户端
    pub account: AccountClient,
    /// 端口探测用 HTTP client
    pub probe: reqwest::Client,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(
        config: GatewayConfig,
        tools: ToolPaths,
        executor: Arc<dyn CommandExecutor>,
        tunnel: Arc<TunnelManager>,
    ) -> Result<Self, reqwest::Error> {
        tracing::info!(
            port = config.port,
            appium_port = config.appium_port,
            proxy_port = config.proxy_port,
            account_api = ?config.account_api,
            account_api_base_url = %config.account_api_base_url,
            tunnel_provider = ?config.tunnel_provider,
            secret_len = config.shared_secret.len(),
            "Loaded configuration"
        );

        let discovery = DeviceDiscovery::new(
            executor.clone(),
            tools.adb.clone(),
            config.appium_port,
            DEVICE_QUERY_TIMEOUT,
        );
        let account = AccountClient::new(config.account_api_base_url.clone())?;
        let probe = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            config,
            tools,
            started_at: Utc::now(),
            discovery,
            tunnel,
            executor,
            account,
            probe,
        })
    }

    /// 本机端口上的服务是否在线（GET /status 返回 2xx）
    pub async fn service_alive(&self, port: u16) -> bool {
        let url = format!("http://localhost:{}/status", port);
        match self.probe.get(&url).timeout(PORT_PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(port, error = %e, "Port probe failed");
                false
            }
        }
    }

    /// Appium 启动命令（程序, 参数）
    pub fn appium_command(&self) -> (String, Vec<String>) {
        appium_command_for(&self.tools.appium, self.appium_args(), cfg!(windows))
    }

    /// Appium 启动参数
    pub fn appium_args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.config.appium_port.to_string(),
            "--allow-insecure=adb_shell".to_string(),
            "--relaxed-security".to_string(),
            "--default-command-timeout".to_string(),
            "600".to_string(),
            "--command-timeout".to_string(),
            "600".to_string(),
        ]
    }
}

/// Windows 上 appium 是 .cmd 脚本，进程 API 不会解析，必须经 `cmd /C`
fn appium_command_for(appium: &str, args: Vec<String>, via_cmd: bool) -> (String, Vec<String>) {
    if via_cmd {
        let mut cmd_args = vec!["/C".to_string(), appium.to_string()];
        cmd_args.extend(args);
        ("cmd".to_string(), cmd_args)
    } else {
        (appium.to_string(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appium_command_direct() {
        let (program, args) = appium_command_for("appium", vec!["-p".into(), "4729".into()], false);
        assert_eq!(program, "appium");
        assert_eq!(args, vec!["-p", "4729"]);
    }

    #[test]
    fn test_appium_command_through_cmd() {
        let (program, args) =
            appium_command_for(r"C:\tools\appium.cmd", vec!["-p".into(), "4729".into()], true);
        assert_eq!(program, "cmd");
        assert_eq!(args, vec!["/C", r"C:\tools\appium.cmd", "-p", "4729"]);
    }
}
