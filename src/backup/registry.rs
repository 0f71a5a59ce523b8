//! 备份元数据持久化
//!
//! 单文件 JSON（备份根目录下的 backups.json），每次备份后整体重写：
//! `{ "backups": [ { "path": 日期目录, "time": 日序号, "backups": [ { "path": "HH-MM", "time": epoch 秒 } ] } ] }`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backup::BackupError;

pub const METADATA_FILE: &str = "backups.json";

/// 一次快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// 日期目录下的子目录名（HH-MM）
    #[serde(rename = "path")]
    pub label: String,
    #[serde(rename = "time")]
    pub created_at: i64,
}

/// 同一天的所有快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayBucket {
    /// 备份根目录下的目录名（YYYY-MM-DD）
    #[serde(rename = "path")]
    pub dir_name: String,
    /// 距锚定日期的天数，唯一标识一个桶
    #[serde(rename = "time")]
    pub day_index: i64,
    #[serde(rename = "backups", default)]
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRegistry {
    #[serde(rename = "backups", default)]
    pub days: Vec<DayBucket>,
}

impl BackupRegistry {
    pub fn path_in(archive_root: &Path) -> PathBuf {
        archive_root.join(METADATA_FILE)
    }

    /// 从 JSON 文件加载；文件不存在时返回空注册表，内容无法解析时返回 RegistryCorrupt
    pub fn load(path: &Path) -> Result<Self, BackupError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(BackupError::io("read registry", path))?;
        serde_json::from_str(&data).map_err(|e| BackupError::RegistryCorrupt(e.to_string()))
    }

    /// 整体覆盖写入
    pub fn save(&self, path: &Path) -> Result<(), BackupError> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(BackupError::io("write registry", path))
    }

    pub fn day(&self, day_index: i64) -> Option<&DayBucket> {
        self.days.iter().find(|d| d.day_index == day_index)
    }

    pub fn slot_count(&self) -> usize {
        self.days.iter().map(|d| d.slots.len()).sum()
    }
}
