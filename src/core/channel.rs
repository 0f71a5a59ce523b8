//! 命令通道：写入一条命令，阻塞直到日志中出现匹配的标记行
//!
//! 状态：Idle → AwaitingMarker → Resolved / TimedOut / Killed / Overflowed。
//! 一次只允许一个请求（`&mut self`），没有内部队列。标记匹配是子串包含，空标记匹配任意一行。
//!
//! 超时只计算「真正空闲」的时间：每收到一行都会重置空闲计时；另有单次请求的行数上限，
//! 防止子进程持续刷日志导致请求永不结束。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::line_source::LineSource;
use crate::core::SupervisorError;

/// 单次请求最多消费的日志行数
pub const MAX_LINES: usize = 10_000;

/// 结果取哪一行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// 返回包含标记的那一行
    MatchLine,
    /// 返回标记行之后的下一行（如 `list` 的玩家名单）
    NextLineAfterMatch,
}

/// 一次待完成的请求
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub command: String,
    pub marker: String,
    pub timeout: Duration,
    pub mode: MatchMode,
}

impl PendingRequest {
    pub fn new(command: impl Into<String>, marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            marker: marker.into(),
            timeout,
            mode: MatchMode::MatchLine,
        }
    }

    pub fn next_line(mut self) -> Self {
        self.mode = MatchMode::NextLineAfterMatch;
        self
    }
}

/// 子进程一侧：写 stdin、存活检测、强制结束
#[async_trait]
pub trait ChildIo: Send {
    /// 写入一行（自动追加换行）并 flush
    async fn write_line(&mut self, line: &str) -> std::io::Result<()>;

    fn is_alive(&mut self) -> bool;

    async fn force_kill(&mut self);
}

/// 通道参数
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    /// 无新行时的退避间隔
    pub poll_interval: Duration,
    pub max_lines: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_lines: MAX_LINES,
        }
    }
}

pub struct CommandChannel {
    lines: LineSource,
    settings: ChannelSettings,
    cancel: CancellationToken,
}

impl CommandChannel {
    pub fn new(lines: LineSource, settings: ChannelSettings, cancel: CancellationToken) -> Self {
        Self {
            lines,
            settings,
            cancel,
        }
    }

    /// 写入命令并等待标记
    pub async fn send(
        &mut self,
        child: &mut dyn ChildIo,
        request: &PendingRequest,
    ) -> Result<String, SupervisorError> {
        tracing::info!(command = %request.command, "Running command");
        child.write_line(&request.command).await?;
        self.await_marker(child, Some(&request.command), &request.marker, request.timeout, request.mode)
            .await
    }

    /// 不写命令，只等待标记（如启动完成标记）
    pub async fn wait_for(
        &mut self,
        child: &mut dyn ChildIo,
        marker: &str,
        timeout: Duration,
        mode: MatchMode,
    ) -> Result<String, SupervisorError> {
        self.await_marker(child, None, marker, timeout, mode).await
    }

    async fn await_marker(
        &mut self,
        child: &mut dyn ChildIo,
        command: Option<&str>,
        marker: &str,
        timeout: Duration,
        mode: MatchMode,
    ) -> Result<String, SupervisorError> {
        tracing::info!(marker = %marker, "Waiting for output");
        let mut consumed = 0usize;
        let mut idle_since: Option<Instant> = None;
        let mut found = false;

        loop {
            if !child.is_alive() || self.cancel.is_cancelled() {
                return Err(SupervisorError::KilledWhileWaiting {
                    marker: marker.to_string(),
                });
            }

            match self.lines.next_line().await {
                Some(line) => {
                    idle_since = None;
                    if found {
                        return Ok(line);
                    }
                    if line.contains(marker) {
                        match mode {
                            MatchMode::MatchLine => return Ok(line),
                            MatchMode::NextLineAfterMatch => found = true,
                        }
                    }
                    consumed += 1;
                    if consumed >= self.settings.max_lines {
                        tracing::error!(
                            marker = %marker,
                            lines = consumed,
                            "Line ceiling reached without a match, killing server"
                        );
                        if child.is_alive() {
                            child.force_kill().await;
                        }
                        return Err(SupervisorError::LineOverflow {
                            marker: marker.to_string(),
                            lines: consumed,
                        });
                    }
                }
                None => {
                    let started = *idle_since.get_or_insert_with(Instant::now);
                    let waited = started.elapsed();
                    if waited > timeout {
                        tracing::warn!(command = ?command, marker = %marker, "Timed out waiting for output");
                        return Err(SupervisorError::CommandTimeout {
                            command: command.map(str::to_string),
                            marker: marker.to_string(),
                            waited,
                        });
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                        _ = self.cancel.cancelled() => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    /// 记录写入的命令；alive / killed 可由测试控制
    #[derive(Default)]
    pub(crate) struct MockChild {
        pub written: Vec<String>,
        pub dead: bool,
        pub killed: bool,
    }

    #[async_trait]
    impl ChildIo for MockChild {
        async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
            self.written.push(format!("{line}\n"));
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            !self.dead && !self.killed
        }

        async fn force_kill(&mut self) {
            self.killed = true;
        }
    }

    pub(crate) fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    fn fast() -> ChannelSettings {
        ChannelSettings {
            poll_interval: Duration::from_millis(10),
            max_lines: MAX_LINES,
        }
    }

    fn channel(path: &Path, settings: ChannelSettings) -> (CommandChannel, CancellationToken) {
        let token = CancellationToken::new();
        (
            CommandChannel::new(LineSource::new(path), settings, token.clone()),
            token,
        )
    }

    #[tokio::test]
    async fn test_returns_first_matching_line() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(
            &log,
            "[INFO]: noise\n[INFO]: Saved the world (1)\n[INFO]: Saved the world (2)\n",
        );
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild::default();

        let req = PendingRequest::new("save-all", "Saved the world", Duration::from_secs(5));
        let line = ch.send(&mut child, &req).await.unwrap();
        assert_eq!(line, "[INFO]: Saved the world (1)");
        assert_eq!(child.written, vec!["save-all\n".to_string()]);
    }

    #[tokio::test]
    async fn test_next_line_mode_returns_following_line() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(
            &log,
            "[INFO]: There are 2 of a max of 20 players online:\n[Server thread/INFO] [DedicatedServer]: alice bob\nlater\n",
        );
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild::default();

        let req = PendingRequest::new("list", " players online:", Duration::from_secs(5)).next_line();
        let line = ch.send(&mut child, &req).await.unwrap();
        assert_eq!(line, "[Server thread/INFO] [DedicatedServer]: alice bob");
    }

    #[tokio::test]
    async fn test_empty_marker_matches_any_line() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(&log, "whatever\n");
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild::default();

        let req = PendingRequest::new("say hi", "", Duration::from_secs(5));
        assert_eq!(ch.send(&mut child, &req).await.unwrap(), "whatever");
    }

    #[tokio::test]
    async fn test_times_out_on_silence() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(&log, "");
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild::default();

        let req = PendingRequest::new("save-off", "Turned off", Duration::from_millis(100));
        let err = ch.send(&mut child, &req).await.unwrap_err();
        match err {
            SupervisorError::CommandTimeout { command, marker, .. } => {
                assert_eq!(command.as_deref(), Some("save-off"));
                assert_eq!(marker, "Turned off");
            }
            other => panic!("Expected CommandTimeout, got {other:?}"),
        }
        assert!(!child.killed);
    }

    #[tokio::test]
    async fn test_active_output_does_not_count_as_idle() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(&log, "");
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild::default();

        // 总时长约 600ms，远超 250ms 超时，但每行间隔只有 30ms
        let writer_log = log.clone();
        let writer = tokio::spawn(async move {
            for i in 0..20 {
                append(&writer_log, &format!("tick {i}\n"));
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            append(&writer_log, "Saved the world\n");
        });

        let req = PendingRequest::new("save-all", "Saved the world", Duration::from_millis(250));
        let line = ch.send(&mut child, &req).await.unwrap();
        assert_eq!(line, "Saved the world");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_line_ceiling_kills_child() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        let noise: String = (0..10).map(|i| format!("spam {i}\n")).collect();
        append(&log, &noise);
        let settings = ChannelSettings {
            poll_interval: Duration::from_millis(10),
            max_lines: 5,
        };
        let (mut ch, _) = channel(&log, settings);
        let mut child = MockChild::default();

        let req = PendingRequest::new("save-all", "Saved the world", Duration::from_secs(60));
        let err = ch.send(&mut child, &req).await.unwrap_err();
        assert!(matches!(err, SupervisorError::LineOverflow { lines: 5, .. }));
        assert!(child.killed);
    }

    #[tokio::test]
    async fn test_cancel_aborts_wait() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(&log, "");
        let (mut ch, token) = channel(&log, fast());
        let mut child = MockChild::default();

        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            t.cancel();
        });

        let req = PendingRequest::new("save-all", "Saved the world", Duration::from_secs(60));
        let err = ch.send(&mut child, &req).await.unwrap_err();
        assert!(err.is_kill());
    }

    #[tokio::test]
    async fn test_dead_child_aborts_before_matching() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("latest.log");
        append(&log, "Saved the world\n");
        let (mut ch, _) = channel(&log, fast());
        let mut child = MockChild {
            dead: true,
            ..Default::default()
        };

        let err = ch
            .wait_for(&mut child, "Saved the world", Duration::from_secs(1), MatchMode::MatchLine)
            .await
            .unwrap_err();
        assert!(err.is_kill());
    }
}
