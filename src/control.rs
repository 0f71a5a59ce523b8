//! 控制文件：pid 文件与 kill 文件
//!
//! kill 文件只追加不截断：每次请求写一行 `now + 有效期`（epoch 秒），监听方只认未过期的行。

use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::shutdown::epoch_now;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ControlError + '_ {
    move |source| ControlError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// 写入当前进程 pid；父目录不存在时自动创建
pub fn write_pid(path: &Path) -> Result<(), ControlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    std::fs::write(path, std::process::id().to_string()).map_err(io_err(path))
}

/// 读取 pid；文件缺失或内容无效时返回 None
pub fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// pid 对应的进程是否存在（kill(pid, 0)）
#[cfg(unix)]
pub fn pid_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // 进程存在但属于其他用户
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: i32) -> bool {
    false
}

/// 追加一条停止请求，返回写入的截止时间
pub fn request_stop(kill_file: &Path, validity_secs: f64) -> Result<f64, ControlError> {
    if let Some(parent) = kill_file.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let deadline = epoch_now() + validity_secs;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(kill_file)
        .and_then(|mut f| writeln!(f, "{deadline}"))
        .map_err(io_err(kill_file))?;
    Ok(deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shutdown::has_live_request;
    use tempfile::TempDir;

    #[test]
    fn test_pid_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("pid.txt");
        assert_eq!(read_pid(&path), None);
        write_pid(&path).unwrap();
        let pid = read_pid(&path).unwrap();
        assert_eq!(pid as u32, std::process::id());
    }

    #[test]
    fn test_read_pid_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pid.txt");
        std::fs::write(&path, "not a pid").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(-1));
        assert!(!pid_alive(0));
    }

    #[test]
    fn test_request_stop_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kill.txt");
        request_stop(&path, -5.0).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!has_live_request(&contents, epoch_now()));

        let deadline = request_stop(&path, 10.0).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(has_live_request(&contents, deadline - 1.0));
    }
}
