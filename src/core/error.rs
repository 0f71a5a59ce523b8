//! 监管错误类型
//!
//! 与 lifetime 循环配合：可恢复的错误（命令超时）由行为调度吸收，其余的结束当前一轮运行，交给外层重试循环。

use std::time::Duration;

use thiserror::Error;

/// 一轮运行（启动 → 运行 → 停止）中可能出现的错误
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// 子进程启动后立即退出或无法启动
    #[error("Failed to launch server: {0}")]
    Launch(String),

    #[error("Timed out after {waited:?} while waiting for output {marker:?} (command: {command:?})")]
    CommandTimeout {
        command: Option<String>,
        marker: String,
        waited: Duration,
    },

    /// 等待期间收到停止请求或子进程退出；不是故障
    #[error("Killed or died while waiting for output {marker:?}")]
    KilledWhileWaiting { marker: String },

    /// 单次等待读取的日志行数超过上限，子进程已被强制结束
    #[error("Exceeded {lines} log lines before finding desired output {marker:?}")]
    LineOverflow { marker: String, lines: usize },

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// 只有命令超时可以在本轮内恢复（补一次保存后继续主循环）
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SupervisorError::CommandTimeout { .. })
    }

    /// 是否由停止请求引起
    pub fn is_kill(&self) -> bool {
        matches!(self, SupervisorError::KilledWhileWaiting { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_is_recoverable() {
        let timeout = SupervisorError::CommandTimeout {
            command: Some("save-all".to_string()),
            marker: "Saved the world".to_string(),
            waited: Duration::from_secs(30),
        };
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_kill());

        let killed = SupervisorError::KilledWhileWaiting {
            marker: "Done".to_string(),
        };
        assert!(!killed.is_recoverable());
        assert!(killed.is_kill());

        let overflow = SupervisorError::LineOverflow {
            marker: "x".to_string(),
            lines: 10_000,
        };
        assert!(!overflow.is_recoverable());
        assert!(!SupervisorError::Launch("exited".into()).is_recoverable());
    }

    #[test]
    fn test_timeout_message_names_command_and_marker() {
        let err = SupervisorError::CommandTimeout {
            command: Some("save-off".to_string()),
            marker: "Turned off world auto-saving".to_string(),
            waited: Duration::from_secs(30),
        };
        let msg = err.to_string();
        assert!(msg.contains("save-off"));
        assert!(msg.contains("Turned off world auto-saving"));
    }
}
