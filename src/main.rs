//! Device Gateway - 本地设备网关
//!
//! Usage:
//! - Normal mode: `device-gateway`
//! - Bundled tools: `device-gateway --tools-dir ./resources/bin`
//! - Without tunnel: `device-gateway --no-tunnel`

use std::path::PathBuf;

use device_gateway::RuntimeConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tools-dir" if i + 1 < args.len() => {
                config.tools_dir = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--no-tunnel" => {
                config.start_tunnel = false;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Device Gateway - 本地设备网关");
    println!();
    println!("USAGE:");
    println!("    device-gateway [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --tools-dir <DIR>    Directory containing adb, scrcpy, cloudflared, ngrok, appium");
    println!("    --no-tunnel          Do not open the public tunnel at startup");
    println!("    -h, --help           Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    PASSWORD             Shared proxy secret (required)");
    println!("    APP_PORT             Control API port (default 3000)");
    println!("    APPIUM_PORT          Appium port (default 4729)");
    println!("    PROXY_PORT           Authenticated proxy port (default 8089)");
    println!("    ACCOUNT_API          Account identifier reported by /config");
    println!("    ACCOUNT_API_BASE_URL Account service base URL");
    println!("    TUNNEL_PROVIDER      cloudflare (default) or ngrok");
    println!("    TUNNEL_AUTH_TOKEN    ngrok authtoken");
}

fn main() {
    // .env 不存在时忽略
    let _ = dotenvy::dotenv();

    let config = parse_args();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(device_gateway::init_and_run_with_config(config)) {
        tracing::error!(error = ?e, "Gateway failed");
        std::process::exit(1);
    }
}
