//! 外部工具路径

use std::path::Path;

use crate::domain::tunnel::TunnelProvider;

/// 外部工具可执行文件路径
///
/// 指定了工具目录时从该目录解析，否则依赖 PATH
#[derive(Clone, Debug, PartialEq)]
pub struct ToolPaths {
    pub adb: String,
    pub scrcpy: String,
    pub appium: String,
    pub tunnel: String,
}

impl ToolPaths {
    pub fn resolve(tools_dir: Option<&Path>, provider: TunnelProvider) -> Self {
        let locate = |name: &str| match tools_dir {
            Some(dir) => dir.join(executable(name)).to_string_lossy().into_owned(),
            None => name.to_string(),
        };
        // npm 安装的 appium 在 Windows 上是 .cmd 脚本，由 `cmd /C` 启动
        let locate_script = |name: &str| match tools_dir {
            Some(dir) if cfg!(windows) => dir.join(format!("{}.cmd", name)).to_string_lossy().into_owned(),
            Some(dir) => dir.join(name).to_string_lossy().into_owned(),
            None => name.to_string(),
        };

        Self {
            adb: locate("adb"),
            scrcpy: locate("scrcpy"),
            appium: locate_script("appium"),
            tunnel: locate(provider.binary_name()),
        }
    }
}

fn executable(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}
