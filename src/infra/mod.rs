//! 基础设施模块
//!
//! 封装外部依赖（HTTP client、命令执行等）

pub mod account_api;
pub mod command;

pub use account_api::{AccountClient, RemoteServiceError};
pub use command::{CommandError, CommandExecutor, CommandOutput, CommandRunner};
