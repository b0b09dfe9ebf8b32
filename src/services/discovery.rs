//! 设备发现
//!
//! 通过 `adb devices` 枚举设备，再对每台设备并发查询型号、系统版本和第三方应用列表

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::device::Device;
use crate::infra::command::{CommandError, CommandExecutor};

/// 设备发现错误
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// `adb devices` 本身失败
    #[error("Device listing failed: {0}")]
    ListFailed(#[source] CommandError),
}

/// 设备发现服务
pub struct DeviceDiscovery {
    executor: Arc<dyn CommandExecutor>,
    adb_path: String,
    appium_port: u16,
    query_timeout: Duration,
}

impl DeviceDiscovery {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        adb_path: impl Into<String>,
        appium_port: u16,
        query_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            adb_path: adb_path.into(),
            appium_port,
            query_timeout,
        }
    }

    /// 列出所有设备
    ///
    /// 单台设备失败只影响该设备的 status，不会使整个调用失败
    pub async fn list_devices(&self) -> Result<Vec<Device>, DiscoveryError> {
        let listing = self
            .executor
            .run(&self.adb_path, &["devices".to_string()], self.query_timeout)
            .await
            .map_err(DiscoveryError::ListFailed)?;

        let ids = parse_device_list(&listing.stdout);
        debug!(count = ids.len(), "Parsed device listing");

        // join_all 按输入顺序返回结果
        let devices = join_all(ids.iter().map(|id| self.device_info(id))).await;

        let failed = devices.iter().filter(|d| d.error.is_some()).count();
        info!(devices = devices.len(), failed, "Device discovery finished");

        Ok(devices)
    }

    async fn device_info(&self, id: &str) -> Device {
        let (model, version, apps) = tokio::join!(
            self.getprop(id, "ro.product.model"),
            self.getprop(id, "ro.build.version.release"),
            self.installed_apps(id),
        );

        match (model, version, apps) {
            (Ok(model), Ok(version), Ok(apps)) => {
                Device::connected(id, self.appium_port, model, version, apps)
            }
            (model, version, apps) => {
                let error = [
                    model.as_ref().err(),
                    version.as_ref().err(),
                    apps.as_ref().err(),
                ]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");

                warn!(device = %id, error = %error, "Failed to get device info");
                Device::failed(id, self.appium_port, model.ok(), version.ok(), error)
            }
        }
    }

    async fn getprop(&self, id: &str, prop: &str) -> Result<String, CommandError> {
        let args = shell_args(id, &["getprop", prop]);
        let output = self
            .executor
            .run(&self.adb_path, &args, self.query_timeout)
            .await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn installed_apps(&self, id: &str) -> Result<Vec<String>, CommandError> {
        let args = shell_args(id, &["pm", "list", "packages", "-3"]);
        let output = self
            .executor
            .run(&self.adb_path, &args, self.query_timeout)
            .await?;
        Ok(parse_package_list(&output.stdout))
    }
}

fn shell_args(id: &str, command: &[&str]) -> Vec<String> {
    let mut args = vec!["-s".to_string(), id.to_string(), "shell".to_string()];
    args.extend(command.iter().map(|s| s.to_string()));
    args
}

/// 解析 `adb devices` 输出
///
/// 第一行是表头，空行跳过，每行取第一个字段作为设备 ID
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// 解析 `pm list packages` 输出
pub fn parse_package_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .map(|line| line.strip_prefix("package:").unwrap_or(line).trim())
        .filter(|pkg| !pkg.is_empty())
        .map(str::to_string)
        .collect()
}
