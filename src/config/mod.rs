//! 配置模块
//!
//! 环境变量解析与外部工具路径

pub mod env;
pub mod tools;

pub use env::{ConfigError, GatewayConfig};
pub use tools::ToolPaths;
