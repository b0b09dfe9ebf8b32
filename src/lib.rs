//! Device Gateway - 本地设备网关
//!
//! 设备发现、Bearer 鉴权的 Appium 反向代理、临时公网隧道

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod state;
pub mod api;
pub mod proxy;
pub mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{
    env::{constants::TUNNEL_START_TIMEOUT, GatewayConfig},
    tools::ToolPaths,
};
use crate::infra::{CommandExecutor, CommandRunner};
use crate::proxy::ProxyState;
use crate::services::tunnel::{TunnelError, TunnelLaunch, TunnelManager};
use crate::state::AppState;

/// 命令行覆盖项
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// 外部工具所在目录（adb / scrcpy / cloudflared / ngrok / appium）
    pub tools_dir: Option<PathBuf>,
    /// 启动时建立隧道
    pub start_tunnel: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tools_dir: None,
            start_tunnel: true,
        }
    }
}

/// 加载配置并运行控制 API 与代理，直到收到 ctrl-c
pub async fn init_and_run_with_config(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("Invalid configuration")?;
    let tools = ToolPaths::resolve(runtime.tools_dir.as_deref(), config.tunnel_provider);

    // 隧道暴露的是鉴权代理端口，公网流量必须经过 Bearer 校验
    let tunnel = Arc::new(TunnelManager::new(TunnelLaunch::new(
        config.tunnel_provider,
        tools.tunnel.clone(),
        config.proxy_port,
        config.tunnel_auth_token.as_deref(),
        TUNNEL_START_TIMEOUT,
    )));

    let executor: Arc<dyn CommandExecutor> = Arc::new(CommandRunner);
    let proxy_state = Arc::new(
        ProxyState::new(config.shared_secret.clone(), config.appium_port)
            .context("Failed to build proxy client")?,
    );
    let state = Arc::new(
        AppState::new(config.clone(), tools, executor, tunnel.clone())
            .context("Failed to build application state")?,
    );

    let control_addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));

    let control_listener = tokio::net::TcpListener::bind(control_addr)
        .await
        .with_context(|| format!("Failed to bind control API on {}", control_addr))?;
    let proxy_listener = tokio::net::TcpListener::bind(proxy_addr)
        .await
        .with_context(|| format!("Failed to bind proxy on {}", proxy_addr))?;

    info!(addr = %control_addr, "Control API listening");
    info!(addr = %proxy_addr, upstream = %proxy_state.upstream, "Proxy listening");

    let shutdown = CancellationToken::new();

    let control_shutdown = shutdown.clone();
    let mut control = tokio::spawn(async move {
        axum::serve(control_listener, api::router(state))
            .with_graceful_shutdown(control_shutdown.cancelled_owned())
            .await
    });
    let proxy_shutdown = shutdown.clone();
    let mut proxy = tokio::spawn(async move {
        axum::serve(proxy_listener, proxy::router(proxy_state))
            .with_graceful_shutdown(proxy_shutdown.cancelled_owned())
            .await
    });

    if runtime.start_tunnel {
        let tunnel = tunnel.clone();
        tokio::spawn(async move {
            match tunnel.start().await {
                Ok(url) => info!(url = %url, "Tunnel created"),
                Err(TunnelError::Cancelled) => info!("Tunnel start cancelled by shutdown"),
                Err(e) => error!(error = %e, "Tunnel error"),
            }
        });
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("Shutdown requested");
        }
        result = &mut control => {
            error!(result = ?result, "Control API stopped unexpectedly");
        }
        result = &mut proxy => {
            error!(result = ?result, "Proxy stopped unexpectedly");
        }
    }

    shutdown.cancel();
    tunnel.stop().await;

    if !control.is_finished() {
        let _ = control.await;
    }
    if !proxy.is_finished() {
        let _ = proxy.await;
    }

    info!("Gateway stopped");
    Ok(())
}
