//! 设备相关领域模型
//!
//! 纯数据类型，无 tokio/axum 依赖

use serde::ser::{Serialize, SerializeStruct, Serializer};

/// 字段不可用时的占位值
pub const UNKNOWN: &str = "Unknown";

/// 设备状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceStatus {
    Connected,
    Error,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Connected => "connected",
            DeviceStatus::Error => "error",
        }
    }
}

/// 一次发现周期中的设备
///
/// `apps_count` 不单独存储，序列化时由 `apps.len()` 计算
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: String,
    pub status: DeviceStatus,
    pub model: String,
    pub os_version: String,
    pub apps: Vec<String>,
    /// Appium 端口，随设备一并上报
    pub port: u16,
    /// 子查询失败原因（仅 status = error 时存在）
    pub error: Option<String>,
}

impl Device {
    pub fn connected(
        id: impl Into<String>,
        port: u16,
        model: impl Into<String>,
        os_version: impl Into<String>,
        apps: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: DeviceStatus::Connected,
            model: or_unknown(model.into()),
            os_version: or_unknown(os_version.into()),
            apps,
            port,
            error: None,
        }
    }

    /// 子查询失败的设备；已取得的字段保留，其余使用占位值
    pub fn failed(
        id: impl Into<String>,
        port: u16,
        model: Option<String>,
        os_version: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: DeviceStatus::Error,
            model: or_unknown(model.unwrap_or_default()),
            os_version: or_unknown(os_version.unwrap_or_default()),
            apps: Vec::new(),
            port,
            error: Some(error.into()),
        }
    }

    pub fn apps_count(&self) -> usize {
        self.apps.len()
    }
}

fn or_unknown(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.error.is_some() { 8 } else { 7 };
        let mut s = serializer.serialize_struct("Device", len)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("status", self.status.as_str())?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("model", &self.model)?;
        s.serialize_field("android_version", &self.os_version)?;
        s.serialize_field("apps", &self.apps)?;
        s.serialize_field("apps_count", &self.apps.len())?;
        if let Some(ref error) = self.error {
            s.serialize_field("error", error)?;
        }
        s.end()
    }
}

/// 上报给账户服务的精简设备信息
#[derive(Debug, serde::Serialize)]
pub struct DeviceReport<'a> {
    pub id: &'a str,
    pub model: &'a str,
    pub android_version: &'a str,
    pub apps: &'a [String],
}

impl<'a> From<&'a Device> for DeviceReport<'a> {
    fn from(device: &'a Device) -> Self {
        Self {
            id: &device.id,
            model: &device.model,
            android_version: &device.os_version,
            apps: &device.apps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_device_json() {
        let device = Device::connected(
            "emulator-5554",
            4729,
            "Pixel 7",
            "14",
            vec!["com.example.a".to_string(), "com.example.b".to_string()],
        );

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["id"], "emulator-5554");
        assert_eq!(json["status"], "connected");
        assert_eq!(json["android_version"], "14");
        assert_eq!(json["apps_count"], 2);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_device_uses_placeholders() {
        let device = Device::failed("abc", 4729, None, Some("13".to_string()), "offline");

        assert_eq!(device.status, DeviceStatus::Error);
        assert_eq!(device.model, UNKNOWN);
        assert_eq!(device.os_version, "13");
        assert!(device.apps.is_empty());

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["apps_count"], 0);
        assert_eq!(json["error"], "offline");
    }

    #[test]
    fn test_blank_model_falls_back() {
        let device = Device::connected("abc", 4729, "  \n", "", vec![]);
        assert_eq!(device.model, UNKNOWN);
        assert_eq!(device.os_version, UNKNOWN);
    }

    #[test]
    fn test_apps_count_tracks_apps() {
        let mut device = Device::connected("abc", 4729, "m", "v", vec!["x".to_string()]);
        device.apps.push("y".to_string());

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["apps_count"], json["apps"].as_array().unwrap().len());
    }
}
