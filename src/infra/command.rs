//! 命令执行器
//!
//! 提供统一的外部命令执行接口：
//! - 超时控制（超时后杀掉子进程，不留孤儿）
//! - stdout/stderr 分离捕获
//! - 后台进程（fire-and-forget）启动

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(std::io::Error),
    /// 命令超时（子进程已被终止）
    Timeout(Duration),
    /// 命令以非零状态退出
    NonZeroExit { code: Option<i32>, stderr: String },
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(e) => write!(f, "Failed to spawn command: {}", e),
            CommandError::Timeout(t) => write!(f, "Command timed out after {:?}", t),
            CommandError::NonZeroExit { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                if stderr.trim().is_empty() {
                    write!(f, "Command exited with code {}", code)
                } else {
                    write!(f, "Command exited with code {}: {}", code, stderr.trim())
                }
            }
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(e) | CommandError::WaitFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// 外部命令执行抽象
///
/// 设备发现和控制 API 通过此 trait 调用外部工具，测试中可替换为假实现
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// 执行命令直到结束，超时则终止子进程
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;

    /// 启动后台进程，不等待其结束；返回 pid
    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<Option<u32>, CommandError>;
}

/// 基于 tokio::process 的命令执行器
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// 执行简单命令（无流式输出）
    pub async fn run_simple(
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        debug!(program = %program, args = ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        // wait_with_output 的 future 被丢弃时 child 随之 drop，kill_on_drop 负责终止进程
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(CommandError::WaitFailed)?,
            Err(_) => {
                error!(program = %program, timeout = ?timeout, "Command timed out, killed");
                return Err(CommandError::Timeout(timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: output.status.code().unwrap_or(0),
        })
    }

    /// 启动后台进程
    ///
    /// 进程退出状态由独立任务等待并记录，不影响调用方
    pub fn spawn_background(program: &str, args: &[String]) -> Result<Option<u32>, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        let pid = child.id();
        let name = program.to_string();
        info!(program = %name, pid = ?pid, "Started background process");

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!(program = %name, pid = ?pid, "Background process exited")
                }
                Ok(status) => {
                    warn!(program = %name, pid = ?pid, status = %status, "Background process exited with failure")
                }
                Err(e) => {
                    warn!(program = %name, pid = ?pid, error = %e, "Failed to wait for background process")
                }
            }
        });

        Ok(pid)
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        Self::run_simple(program, args, timeout).await
    }

    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<Option<u32>, CommandError> {
        Self::spawn_background(program, args)
    }
}
