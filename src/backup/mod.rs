//! 备份轮转：按日期分桶的存档快照
//!
//! - clock: 当前时间来源（测试中可固定）
//! - registry: backups.json 元数据（日期桶 / 快照槽）
//! - engine: take_backup 复制、剪枝与持久化

pub mod clock;
pub mod engine;
pub mod registry;

use std::path::PathBuf;

use thiserror::Error;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{BackupEngine, SnapshotRef};
pub use registry::{BackupRegistry, DayBucket, Slot, METADATA_FILE};

/// 保留的日期桶数量
pub const DAY_RETENTION: usize = 5;
/// 每个日期桶保留的快照数量
pub const SLOT_RETENTION: usize = 5;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup {op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup registry corrupt: {0}")]
    RegistryCorrupt(String),

    #[error("Failed to serialize backup registry: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BackupError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| BackupError::Io { op, path, source }
    }
}
