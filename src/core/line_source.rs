//! 服务器日志游标
//!
//! 增量读取子进程追加写入的日志文件（不是子进程的 stdout）。没有完整的新行时返回 None 而不阻塞；
//! 文件被截断（长度小于已读位置）或被替换（unix 上 inode 变化）时从头重新打开。

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

/// 日志行来源；文件尚不存在时同样返回 None，下次调用再尝试打开
#[derive(Debug)]
pub struct LineSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    position: u64,
    /// 尚未以换行结束的半行
    partial: Vec<u8>,
    /// 打开时的文件标识（unix 上为 inode）
    file_id: Option<u64>,
}

impl LineSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: None,
            position: 0,
            partial: Vec::new(),
            file_id: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取下一条完整日志行（去掉行尾换行）
    pub async fn next_line(&mut self) -> Option<String> {
        if self.reader.is_none() {
            match File::open(&self.path).await {
                Ok(file) => {
                    self.file_id = file.metadata().await.ok().and_then(|m| file_id(&m));
                    self.reader = Some(BufReader::new(file));
                }
                Err(e) => {
                    tracing::debug!(path = %self.path.display(), error = %e, "log not readable yet");
                    return None;
                }
            }
        }
        let reader = self.reader.as_mut()?;

        let mut chunk = Vec::new();
        match reader.read_until(b'\n', &mut chunk).await {
            Ok(0) => {
                self.reopen_if_truncated().await;
                None
            }
            Ok(n) => {
                self.position += n as u64;
                self.partial.extend_from_slice(&chunk);
                if self.partial.last() != Some(&b'\n') {
                    return None;
                }
                let raw = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&raw);
                Some(line.trim_end_matches(['\n', '\r']).to_string())
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "log read failed, reopening");
                self.reset();
                None
            }
        }
    }

    async fn reopen_if_truncated(&mut self) {
        if let Ok(meta) = tokio::fs::metadata(&self.path).await {
            let replaced = matches!((self.file_id, file_id(&meta)), (Some(old), Some(new)) if old != new);
            if meta.len() < self.position || replaced {
                tracing::info!(path = %self.path.display(), "log truncated or replaced, reading from start");
                self.reset();
            }
        }
    }

    fn reset(&mut self) {
        self.reader = None;
        self.position = 0;
        self.partial.clear();
        self.file_id = None;
    }
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
