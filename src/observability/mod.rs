//! 日志：标准输出 + 按日期滚动的管理器日志文件
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖。文件名 `manager-YYYY-MM-DD.log`，跨过午夜后写入新文件，
//! 只保留最新的 keep_files 个。

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::backup::{Clock, SystemClock};

const LOG_PREFIX: &str = "manager-";
const LOG_SUFFIX: &str = ".log";

/// 初始化全局 subscriber；log_dir 为 None 时只输出到标准输出。返回当天的日志文件路径
pub fn init(log_dir: Option<&Path>, keep_files: usize) -> anyhow::Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, log_path) = match log_dir {
        Some(dir) => {
            let log = DailyLog::open(dir, keep_files, Arc::new(SystemClock))?;
            let path = log.current_path();
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(log));
            (Some(layer), path)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()?;
    Ok(log_path)
}

/// 按本地日期滚动的日志文件；日期变化时打开新文件并清理旧文件
pub struct DailyLog {
    dir: PathBuf,
    keep_files: usize,
    clock: Arc<dyn Clock>,
    current: Option<(NaiveDate, File)>,
}

impl DailyLog {
    pub fn open(dir: &Path, keep_files: usize, clock: Arc<dyn Clock>) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            keep_files,
            clock,
            current: None,
        };
        let today = log.clock.now().date_naive();
        log.roll(today)?;
        Ok(log)
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{LOG_PREFIX}{}{LOG_SUFFIX}", date.format("%Y-%m-%d")))
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.as_ref().map(|(date, _)| self.path_for(*date))
    }

    fn roll(&mut self, date: NaiveDate) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(date))?;
        self.current = Some((date, file));
        // 写日志途中不能再走 tracing
        if let Err(e) = prune_logs(&self.dir, self.keep_files) {
            eprintln!("Failed to prune manager logs in {}: {e}", self.dir.display());
        }
        Ok(())
    }

    fn file_for_today(&mut self) -> io::Result<&mut File> {
        let today = self.clock.now().date_naive();
        if self.current.as_ref().map(|(date, _)| *date) != Some(today) {
            self.roll(today)?;
        }
        match self.current.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "manager log not open")),
        }
    }
}

impl Write for DailyLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_for_today()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 删除多余的旧日志，返回删除数量
pub fn prune_logs(dir: &Path, keep_files: usize) -> io::Result<usize> {
    let mut logs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX))
        })
        .collect();
    if logs.len() <= keep_files {
        return Ok(0);
    }
    // 文件名中的日期按字典序即时间序
    logs.sort();
    let excess = logs.len() - keep_files;
    let mut removed = 0;
    for path in logs.into_iter().take(excess) {
        std::fs::remove_file(&path)?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::FixedClock;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    #[test]
    fn test_prune_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for day in 1..=9 {
            std::fs::write(dir.path().join(format!("manager-2024-01-0{day}.log")), "x").unwrap();
        }
        std::fs::write(dir.path().join("latest.log"), "x").unwrap();

        assert_eq!(prune_logs(dir.path(), 7).unwrap(), 2);
        assert!(!dir.path().join("manager-2024-01-01.log").exists());
        assert!(!dir.path().join("manager-2024-01-02.log").exists());
        assert!(dir.path().join("manager-2024-01-03.log").exists());
        assert!(dir.path().join("latest.log").exists());
        assert_eq!(prune_logs(dir.path(), 7).unwrap(), 0);
    }

    #[test]
    fn test_rolls_over_at_midnight_and_prunes() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(FixedClock::new(Local.with_ymd_and_hms(2024, 1, 1, 23, 59, 0).unwrap()));
        let mut log = DailyLog::open(dir.path(), 2, clock.clone()).unwrap();
        assert_eq!(log.current_path(), Some(dir.path().join("manager-2024-01-01.log")));

        log.write_all(b"before midnight\n").unwrap();
        clock.set(Local.with_ymd_and_hms(2024, 1, 2, 0, 1, 0).unwrap());
        log.write_all(b"after midnight\n").unwrap();
        log.flush().unwrap();

        assert_eq!(log.current_path(), Some(dir.path().join("manager-2024-01-02.log")));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("manager-2024-01-01.log")).unwrap(),
            "before midnight\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("manager-2024-01-02.log")).unwrap(),
            "after midnight\n"
        );

        clock.set(Local.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap());
        log.write_all(b"third day\n").unwrap();
        assert!(!dir.path().join("manager-2024-01-01.log").exists());
        assert!(dir.path().join("manager-2024-01-02.log").exists());
        assert!(dir.path().join("manager-2024-01-03.log").exists());
    }

    #[test]
    fn test_reopening_same_day_appends() {
        let dir = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Local.with_ymd_and_hms(2024, 5, 5, 9, 0, 0).unwrap()));
        let mut first = DailyLog::open(dir.path(), 7, clock.clone()).unwrap();
        first.write_all(b"one\n").unwrap();
        drop(first);
        let mut second = DailyLog::open(dir.path(), 7, clock).unwrap();
        second.write_all(b"two\n").unwrap();

        let path = dir.path().join("manager-2024-05-05.log");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "one\ntwo\n");
    }
}
