//! Tunnel process manager
//!
//! We run the tunnel provider (`cloudflared` / `ngrok`) locally, read its output until the
//! assigned public URL shows up, and keep exactly one session alive.

use std::{
    collections::VecDeque,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{mpsc, oneshot, Mutex, RwLock},
    task::JoinHandle,
};

use crate::domain::tunnel::{TunnelProvider, TunnelState, TunnelStatus};

const MAX_LOG_LINES: usize = 500;

/// 隧道错误
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Failed to start tunnel process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Tunnel closed with code {}", describe_code(.code))]
    Exited { code: Option<i32> },

    #[error("No public URL within {0:?}")]
    Timeout(Duration),

    #[error("Tunnel start cancelled")]
    Cancelled,
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// 隧道进程启动参数
#[derive(Clone, Debug)]
pub struct TunnelLaunch {
    pub provider: TunnelProvider,
    pub program: String,
    pub args: Vec<String>,
    /// 额外环境变量（凭据），不写入日志
    pub env: Vec<(String, String)>,
    pub start_timeout: Duration,
}

impl TunnelLaunch {
    pub fn new(
        provider: TunnelProvider,
        program: impl Into<String>,
        local_port: u16,
        auth_token: Option<&str>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            program: program.into(),
            args: provider.launch_args(local_port),
            env: provider.launch_env(auth_token),
            start_timeout,
        }
    }
}

/// Shared between the manager and the per-session supervisor task.
struct Shared {
    state: RwLock<TunnelState>,
    public_url: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    pid: RwLock<Option<u32>>,
    generation: AtomicU64,
    log_lines: RwLock<VecDeque<String>>,
}

impl Shared {
    async fn push_log(&self, line: String) {
        let mut buf = self.log_lines.write().await;
        buf.push_back(line);
        while buf.len() > MAX_LOG_LINES {
            buf.pop_front();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// 一个存活的隧道会话；子进程由 supervisor 任务独占
struct TunnelSession {
    generation: u64,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

pub struct TunnelManager {
    launch: TunnelLaunch,
    /// 串行化 start；等待 URL 期间只持有这把锁
    start_lock: Mutex<()>,
    /// 当前会话，只在注册、摘除时短暂持有
    session: Mutex<Option<TunnelSession>>,
    shared: Arc<Shared>,
}

impl TunnelManager {
    pub fn new(launch: TunnelLaunch) -> Self {
        Self {
            launch,
            start_lock: Mutex::new(()),
            session: Mutex::new(None),
            shared: Arc::new(Shared {
                state: RwLock::new(TunnelState::Idle),
                public_url: RwLock::new(None),
                last_error: RwLock::new(None),
                started_at: RwLock::new(None),
                pid: RwLock::new(None),
                generation: AtomicU64::new(0),
                log_lines: RwLock::new(VecDeque::new()),
            }),
        }
    }

    /// 当前公网 URL（仅 active 状态下存在）
    pub async fn public_url(&self) -> Option<String> {
        self.shared.public_url.read().await.clone()
    }

    pub async fn state(&self) -> TunnelState {
        *self.shared.state.read().await
    }

    pub async fn status(&self) -> TunnelStatus {
        TunnelStatus {
            provider: self.launch.provider,
            state: *self.shared.state.read().await,
            url: self.shared.public_url.read().await.clone(),
            pid: *self.shared.pid.read().await,
            started_at: *self.shared.started_at.read().await,
            last_error: self.shared.last_error.read().await.clone(),
        }
    }

    pub async fn tail_logs(&self, tail: usize) -> Vec<String> {
        let tail = tail.clamp(1, MAX_LOG_LINES);
        let lines = self.shared.log_lines.read().await;
        let start = lines.len().saturating_sub(tail);
        lines.iter().skip(start).cloned().collect()
    }

    /// Start the tunnel and wait for its public URL.
    ///
    /// Returns the existing URL if a session is already active. No retry here.
    /// A concurrent `stop()` kills the process and makes this return `Cancelled`.
    pub async fn start(&self) -> Result<String, TunnelError> {
        let _starting = self.start_lock.lock().await;

        let (generation, mut line_rx, mut exit_rx) = {
            let mut guard = self.session.lock().await;

            if guard.is_some() {
                if let Some(url) = self.public_url().await {
                    return Ok(url);
                }
            }
            // a stale session (failed supervisor) may still be parked here
            if let Some(stale) = guard.take() {
                Self::shutdown(stale).await;
            }

            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.set_state(TunnelState::Starting).await;
            *self.shared.public_url.write().await = None;
            *self.shared.last_error.write().await = None;

            self.shared
                .push_log(format!(
                    "[tunnel] starting {}: {} {}",
                    self.launch.provider.binary_name(),
                    self.launch.program,
                    self.launch.args.join(" ")
                ))
                .await;

            let mut child = match Command::new(&self.launch.program)
                .args(&self.launch.args)
                .envs(self.launch.env.iter().map(|(k, v)| (k, v)))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(child) => child,
                Err(e) => {
                    self.fail(format!("spawn failed: {}", e)).await;
                    return Err(TunnelError::Spawn(e));
                }
            };

            let pid = child.id();
            *self.shared.pid.write().await = pid;
            *self.shared.started_at.write().await = Some(Utc::now());

            let (line_tx, line_rx) = mpsc::channel::<String>(256);
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_lines(stdout, line_tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_lines(stderr, line_tx));
            }

            let (kill_tx, kill_rx) = oneshot::channel();
            let (exit_tx, exit_rx) = oneshot::channel();
            let supervisor = tokio::spawn(supervise(
                child,
                generation,
                self.shared.clone(),
                kill_rx,
                exit_tx,
            ));

            *guard = Some(TunnelSession {
                generation,
                kill_tx: Some(kill_tx),
                supervisor,
            });

            tracing::info!(provider = ?self.launch.provider, pid = ?pid, "Tunnel process started");
            (generation, line_rx, exit_rx)
        };

        let deadline = tokio::time::sleep(self.launch.start_timeout);
        tokio::pin!(deadline);
        let mut streams_open = true;

        let outcome = loop {
            tokio::select! {
                line = line_rx.recv(), if streams_open => match line {
                    Some(line) => {
                        let url = self.launch.provider.extract_url(&line);
                        self.shared.push_log(line).await;
                        if let Some(url) = url {
                            break Ok(url);
                        }
                    }
                    None => streams_open = false,
                },
                code = &mut exit_rx => {
                    // sender dropped without a code: the supervisor was told to kill
                    break match code {
                        Ok(code) => Err(TunnelError::Exited { code }),
                        Err(_) => Err(TunnelError::Cancelled),
                    };
                }
                _ = &mut deadline => {
                    break Err(TunnelError::Timeout(self.launch.start_timeout));
                }
            }
        };

        // stop() 已接管会话并负责状态
        if !self.shared.is_current(generation) {
            tracing::info!("Tunnel start cancelled");
            return Err(TunnelError::Cancelled);
        }

        match outcome {
            Ok(url) => {
                // 继续消费剩余输出，避免管道写满阻塞隧道进程
                let shared = self.shared.clone();
                tokio::spawn(async move {
                    while let Some(line) = line_rx.recv().await {
                        shared.push_log(line).await;
                    }
                });

                // lock order: state -> public_url (same as supervise)
                let activated = {
                    let mut state = self.shared.state.write().await;
                    // the process may have died between the match and here
                    if *state == TunnelState::Starting && self.shared.is_current(generation) {
                        *self.shared.public_url.write().await = Some(url.clone());
                        *state = TunnelState::Active;
                        true
                    } else {
                        false
                    }
                };
                if !activated {
                    self.release(generation).await;
                    return Err(TunnelError::Exited { code: None });
                }

                tracing::info!(url = %url, "Tunnel established");
                Ok(url)
            }
            Err(e) => {
                // 超时：release 会终止进程；进程已退出时 supervisor 已记录 failed
                let timed_out = matches!(e, TunnelError::Timeout(_));
                let mut guard = self.session.lock().await;
                if guard.as_ref().map(|s| s.generation) == Some(generation) {
                    if let Some(session) = guard.take() {
                        Self::shutdown(session).await;
                    }
                    if timed_out && self.shared.is_current(generation) {
                        self.fail(e.to_string()).await;
                    }
                    *self.shared.pid.write().await = None;
                }
                drop(guard);

                tracing::warn!(error = %e, "Tunnel failed to start");
                Err(e)
            }
        }
    }

    /// Terminate the tunnel process. Idempotent.
    ///
    /// Also cancels a start that is still waiting for its URL.
    pub async fn stop(&self) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.take() else {
            return;
        };

        self.shared.push_log("[tunnel] stopping".to_string()).await;
        // 先推进 generation，supervisor 与等待中的 start 都不再改写状态
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!(generation = session.generation, "Stopping tunnel");

        Self::shutdown(session).await;

        *self.shared.public_url.write().await = None;
        *self.shared.pid.write().await = None;
        self.set_state(TunnelState::Closed).await;
    }

    /// 摘除并终止指定代的会话（已被替换时不做任何事）
    async fn release(&self, generation: u64) {
        let mut guard = self.session.lock().await;
        if guard.as_ref().map(|s| s.generation) == Some(generation) {
            if let Some(session) = guard.take() {
                Self::shutdown(session).await;
            }
            *self.shared.pid.write().await = None;
        }
    }

    async fn shutdown(mut session: TunnelSession) {
        if let Some(kill) = session.kill_tx.take() {
            let _ = kill.send(());
        }
        if let Err(e) = session.supervisor.await {
            tracing::warn!(error = %e, "Tunnel supervisor task failed");
        }
    }

    async fn set_state(&self, state: TunnelState) {
        *self.shared.state.write().await = state;
    }

    async fn fail(&self, msg: String) {
        self.shared.push_log(format!("[tunnel] {}", msg)).await;
        *self.shared.last_error.write().await = Some(msg);
        *self.shared.public_url.write().await = None;
        self.set_state(TunnelState::Failed).await;
    }
}

/// Owns the child until it exits or is killed, and always reaps it.
async fn supervise(
    mut child: Child,
    generation: u64,
    shared: Arc<Shared>,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<Option<i32>>,
) {
    tokio::select! {
        status = child.wait() => {
            let code = status.as_ref().ok().and_then(|s| s.code());
            let msg = match status {
                Ok(status) => format!("tunnel process exited: {}", status),
                Err(e) => format!("failed to wait for tunnel process: {}", e),
            };
            shared.push_log(format!("[tunnel] {}", msg)).await;

            let mut state = shared.state.write().await;
            if shared.is_current(generation) {
                tracing::warn!(code = ?code, "Tunnel process terminated unexpectedly");
                *state = TunnelState::Failed;
                *shared.public_url.write().await = None;
                *shared.last_error.write().await = Some(msg);
                *shared.pid.write().await = None;
            }
            drop(state);
            let _ = exit_tx.send(code);
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill tunnel process");
            }
            // kill() 已等待进程退出
            let _ = child.wait().await;
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
