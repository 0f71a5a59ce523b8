//! 进程监管：子进程生命周期、可中断睡眠、有序停止
//!
//! 持有子进程句柄（独占）、命令通道与本轮运行的取消 token；kill 文件监听任务与本轮运行同生命周期，
//! stop() 返回前一定已经 join。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backup::BackupEngine;
use crate::config::{AppConfig, ProtocolSection};
use crate::core::channel::{ChannelSettings, ChildIo, CommandChannel, MatchMode, PendingRequest};
use crate::core::line_source::LineSource;
use crate::core::shutdown::{sleep_or_cancelled, KillSwitch, ShutdownWatch};
use crate::core::SupervisorError;

/// 启动参数
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// 子进程追加写入的日志
    pub log_file: PathBuf,
}

/// 监管参数
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub launch_grace: Duration,
    pub command_timeout: Duration,
    pub ready_timeout: Duration,
    pub channel: ChannelSettings,
    pub kill_file: PathBuf,
    pub kill_poll: Duration,
    pub protocol: ProtocolSection,
}

impl LaunchSpec {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            argv: cfg.server.start_command.clone(),
            cwd: cfg.server.path.clone(),
            log_file: cfg.server.log_path(),
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            launch_grace: Duration::from_millis(cfg.server.launch_grace_ms),
            command_timeout: cfg.command_timeout(),
            ready_timeout: Duration::from_secs(cfg.server.ready_timeout_secs),
            channel: ChannelSettings {
                poll_interval: Duration::from_millis(cfg.server.poll_interval_ms),
                max_lines: cfg.server.max_lines,
            },
            kill_file: cfg.control.kill_file(),
            kill_poll: Duration::from_millis(cfg.control.kill_poll_ms),
            protocol: cfg.protocol.clone(),
        }
    }
}

/// 子进程句柄与其 stdin
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ChildProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// 关闭 stdin 并等待退出；已退出时直接返回缓存的状态
    async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.stdin.take();
        self.child.wait().await
    }
}

#[async_trait]
impl ChildIo for ChildProcess {
    async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "server stdin closed"))?;
        stdin.write_all(format!("{line}\n").as_bytes()).await?;
        stdin.flush().await
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "Failed to kill server");
        }
    }
}

pub struct ProcessSupervisor {
    child: ChildProcess,
    channel: CommandChannel,
    kill: KillSwitch,
    /// 本轮运行的 token：随 KillSwitch 取消，stop() 时单独取消
    run_token: CancellationToken,
    watch: Option<JoinHandle<()>>,
    settings: SupervisorSettings,
}

impl ProcessSupervisor {
    /// 启动子进程；宽限时间后仍已退出则返回 Launch
    pub async fn start(
        launch: &LaunchSpec,
        settings: SupervisorSettings,
        kill: &KillSwitch,
    ) -> Result<Self, SupervisorError> {
        let (program, args) = launch
            .argv
            .split_first()
            .ok_or_else(|| SupervisorError::Launch("empty start command".into()))?;
        tracing::info!(command = %launch.argv.join(" "), cwd = %launch.cwd.display(), "Starting server");

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&launch.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::Launch(format!("{program}: {e}")))?;
        let stdin = child.stdin.take();

        tokio::time::sleep(settings.launch_grace).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(SupervisorError::Launch(format!("server exited immediately ({status})")));
        }

        let run_token = kill.child_token();
        let watch = ShutdownWatch::new(&settings.kill_file, settings.kill_poll)
            .spawn(kill.clone(), run_token.clone());
        let channel = CommandChannel::new(
            LineSource::new(&launch.log_file),
            settings.channel,
            run_token.clone(),
        );

        Ok(Self {
            child: ChildProcess { child, stdin },
            channel,
            kill: kill.clone(),
            run_token,
            watch: Some(watch),
            settings,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        self.child.is_alive()
    }

    pub fn should_run(&mut self) -> bool {
        self.is_alive() && !self.kill.is_killed()
    }

    pub fn was_killed(&self) -> bool {
        self.kill.is_killed()
    }

    pub fn protocol(&self) -> &ProtocolSection {
        &self.settings.protocol
    }

    /// 可中断睡眠：收到停止请求时立即返回；睡满返回 true
    pub async fn sleep(&self, duration: Duration) -> bool {
        sleep_or_cancelled(&self.run_token, duration).await
    }

    pub async fn send(&mut self, request: &PendingRequest) -> Result<String, SupervisorError> {
        self.channel.send(&mut self.child, request).await
    }

    /// 使用默认命令超时发送命令
    pub async fn send_command(&mut self, command: &str, marker: &str) -> Result<String, SupervisorError> {
        let request = PendingRequest::new(command, marker, self.settings.command_timeout);
        self.send(&request).await
    }

    pub async fn wait_for_output(
        &mut self,
        marker: &str,
        timeout: Duration,
        mode: MatchMode,
    ) -> Result<String, SupervisorError> {
        self.channel.wait_for(&mut self.child, marker, timeout, mode).await
    }

    /// 等待服务器启动完成标记
    pub async fn wait_ready(&mut self) -> Result<String, SupervisorError> {
        let marker = self.settings.protocol.ready_marker.clone();
        let timeout = self.settings.ready_timeout;
        self.wait_for_output(&marker, timeout, MatchMode::MatchLine).await
    }

    /// 关闭自动保存 → 保存 → 备份 → 恢复自动保存；备份失败只记录日志
    pub async fn save_game(&mut self, backups: &mut BackupEngine, save_path: &Path) -> Result<(), SupervisorError> {
        let p = self.settings.protocol.clone();
        self.send_command(&p.save_off_command, &p.save_off_marker).await?;
        self.send_command(&p.save_all_command, &p.save_all_marker).await?;
        // 存档复制是阻塞 I/O
        match tokio::task::block_in_place(|| backups.take_backup(save_path)) {
            Ok(snapshot) => tracing::info!(path = %snapshot.path.display(), "Backup taken"),
            Err(e) => tracing::error!(error = %e, "Backup failed, continuing without a fresh snapshot"),
        }
        self.send_command(&p.save_on_command, &p.save_on_marker).await?;
        Ok(())
    }

    /// 在线玩家名单（`list` 之后的下一行）
    pub async fn list_players(&mut self) -> Result<Vec<String>, SupervisorError> {
        let p = self.settings.protocol.clone();
        let request = PendingRequest::new(&p.list_command, &p.list_marker, self.settings.command_timeout).next_line();
        let line = self.send(&request).await?;
        Ok(parse_players(&line, &p.list_prefix).unwrap_or_else(|| {
            tracing::error!(output = %line, "Failed to find player list in output");
            Vec::new()
        }))
    }

    /// 有序停止：存活时发送停止命令（不等待标记），等待退出，结束并 join 监听任务；可重复调用
    pub async fn stop(&mut self) {
        if self.is_alive() {
            let command = self.settings.protocol.stop_command.clone();
            if let Err(e) = self.child.write_line(&command).await {
                tracing::warn!(error = %e, "Failed to send stop command");
            }
        }
        match self.child.wait().await {
            Ok(status) => tracing::info!(%status, "Server exited"),
            Err(e) => tracing::warn!(error = %e, "Failed to wait for server exit"),
        }
        self.run_token.cancel();
        if let Some(handle) = self.watch.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Shutdown listener panicked");
            }
        }
    }
}

/// 从名单行中取出玩家名；找不到前缀时返回 None
pub fn parse_players(line: &str, prefix: &str) -> Option<Vec<String>> {
    let start = line.find(prefix)? + prefix.len();
    Some(
        line[start..]
            .split_whitespace()
            .map(|name| name.trim_matches(',').to_string())
            .filter(|name| !name.is_empty())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shutdown::ShutdownReason;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_parse_players() {
        let prefix = "DedicatedServer]:";
        assert_eq!(
            parse_players("[12:00:00] [Server thread/INFO] [DedicatedServer]: alice, bob", prefix),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
        assert_eq!(parse_players("[DedicatedServer]:   ", prefix), Some(vec![]));
        assert_eq!(parse_players("unrelated", prefix), None);
    }

    fn settings(dir: &Path) -> SupervisorSettings {
        let mut cfg = AppConfig::default();
        cfg.server.launch_grace_ms = 200;
        cfg.server.poll_interval_ms = 20;
        cfg.server.command_timeout_secs = 5;
        cfg.control.dir = dir.to_path_buf();
        cfg.control.kill_poll_ms = 50;
        SupervisorSettings::from_config(&cfg)
    }

    /// 把收到的每条命令写入日志，收到 stop 后退出
    #[cfg(unix)]
    fn echo_server(dir: &Path) -> LaunchSpec {
        let script = r#"while read -r l; do echo "[Server thread/INFO]: got $l" >> latest.log; [ "$l" = stop ] && exit 0; done"#;
        std::fs::write(dir.join("latest.log"), "").unwrap();
        LaunchSpec {
            argv: vec!["sh".into(), "-c".into(), script.into()],
            cwd: dir.to_path_buf(),
            log_file: dir.join("latest.log"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_when_child_exits() {
        let dir = TempDir::new().unwrap();
        let launch = LaunchSpec {
            argv: vec!["sh".into(), "-c".into(), "exit 3".into()],
            cwd: dir.path().to_path_buf(),
            log_file: dir.path().join("latest.log"),
        };
        let err = ProcessSupervisor::start(&launch, settings(dir.path()), &KillSwitch::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::Launch(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_launch_error() {
        let dir = TempDir::new().unwrap();
        let launch = LaunchSpec {
            argv: vec![],
            cwd: dir.path().to_path_buf(),
            log_file: dir.path().join("latest.log"),
        };
        let err = ProcessSupervisor::start(&launch, settings(dir.path()), &KillSwitch::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::Launch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_round_trip_and_double_stop() {
        let dir = TempDir::new().unwrap();
        let kill = KillSwitch::new();
        let mut server = ProcessSupervisor::start(&echo_server(dir.path()), settings(dir.path()), &kill)
            .await
            .unwrap();
        assert!(server.should_run());

        let line = server.send_command("hello", "got hello").await.unwrap();
        assert!(line.ends_with("got hello"));

        server.stop().await;
        assert!(!server.is_alive());
        server.stop().await;
        assert!(!server.is_alive());
        // 正常停止不触发全局开关
        assert!(!kill.is_killed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_file_wakes_sleep_and_stops_should_run() {
        let dir = TempDir::new().unwrap();
        let kill = KillSwitch::new();
        let settings = settings(dir.path());
        let kill_file = settings.kill_file.clone();
        let mut server = ProcessSupervisor::start(&echo_server(dir.path()), settings, &kill)
            .await
            .unwrap();

        crate::control::request_stop(&kill_file, 10.0).unwrap();
        let start = Instant::now();
        assert!(!server.sleep(Duration::from_secs(30)).await);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!server.should_run());
        assert_eq!(kill.reason(), Some(ShutdownReason::KillFile));

        let err = server.send_command("hello", "got hello").await.unwrap_err();
        assert!(err.is_kill());
        server.stop().await;
        assert!(!server.is_alive());
    }
}
