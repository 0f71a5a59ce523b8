//! 停止信号：进程级 KillSwitch 与 kill 文件监听
//!
//! - KillSwitch 只能被触发一次，触发后对所有等待者可见，不会复位
//! - 外部请求者向 kill 文件追加一行 `now + 有效期`，watch 任务每秒轮询，值 >= 当前时间即视为有效请求
//! - Ctrl+C / SIGTERM 在边界处转换为同一个 KillSwitch，内部逻辑不关心信号来源

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 SIGTERM
    Signal,
    /// kill 文件中出现未过期的请求
    KillFile,
    /// 程序内部主动停止
    Requested,
}

/// 进程级停止开关
#[derive(Clone, Debug)]
pub struct KillSwitch {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// 触发停止；重复触发只保留第一次的原因
    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!(?reason, "Stop requested");
        }
        self.token.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 单轮运行使用的子 token：随 KillSwitch 一起取消，也可以单独取消而不影响全局
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub async fn killed(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(&self) {
        let switch = self.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                switch.trigger(ShutdownReason::Signal);
            }
        });

        #[cfg(unix)]
        {
            let switch = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    switch.trigger(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

/// 可中断睡眠：睡满返回 true，token 被取消时立即返回 false
pub async fn sleep_or_cancelled(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

/// 当前时间（epoch 秒，带小数），与请求者写入的格式一致
pub fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// kill 文件内容中是否存在未过期的请求；无法解析的行忽略
pub fn has_live_request(contents: &str, now: f64) -> bool {
    contents
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .any(|deadline| deadline >= now)
}

/// kill 文件监听任务
#[derive(Debug, Clone)]
pub struct ShutdownWatch {
    kill_file: PathBuf,
    poll_interval: Duration,
}

impl ShutdownWatch {
    pub fn new(kill_file: impl AsRef<Path>, poll_interval: Duration) -> Self {
        Self {
            kill_file: kill_file.as_ref().to_path_buf(),
            poll_interval,
        }
    }

    /// 在后台运行监听；`run_token` 取消后任务退出
    pub fn spawn(self, switch: KillSwitch, run_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(switch, run_token).await })
    }

    async fn run(self, switch: KillSwitch, run_token: CancellationToken) {
        tracing::info!(kill_file = %self.kill_file.display(), "Started shutdown listener");
        while sleep_or_cancelled(&run_token, self.poll_interval).await {
            // 文件缺失或暂时被占用时跳过本轮
            let Ok(contents) = tokio::fs::read_to_string(&self.kill_file).await else {
                continue;
            };
            if has_live_request(&contents, epoch_now()) {
                tracing::info!("Killed by stop request");
                switch.trigger(ShutdownReason::KillFile);
                break;
            }
        }
        tracing::debug!("Shutdown listener exited");
    }
}
