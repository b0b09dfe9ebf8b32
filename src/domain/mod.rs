//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod device;
pub mod tunnel;

// Re-exports for convenience
pub use device::{Device, DeviceStatus};
pub use tunnel::{TunnelProvider, TunnelState, TunnelStatus};
