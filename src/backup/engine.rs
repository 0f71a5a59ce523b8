//! 备份引擎
//!
//! take_backup 的顺序：找到/创建当天的桶 → 追加快照槽 → 复制存档目录 → 剪枝 → 整体重写 backups.json。
//! 同一分钟内的两次备份落在同一个物理目录，但会产生两条快照元数据。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use walkdir::WalkDir;

use crate::backup::{BackupError, BackupRegistry, Clock, DayBucket, Slot, DAY_RETENTION, SLOT_RETENTION};

/// 日序号的锚定日期
pub fn anchor_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 9, 6).expect("anchor date is valid")
}

/// 距锚定日期的天数（纯日期运算，与时区无关）
pub fn day_index(date: NaiveDate) -> i64 {
    (date - anchor_date()).num_days()
}

/// 一次快照在磁盘上的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub day_dir: String,
    pub label: String,
    /// archive_root/<date>/<HH-MM>/<存档目录名>
    pub path: PathBuf,
}

pub struct BackupEngine {
    archive_root: PathBuf,
    registry: BackupRegistry,
    clock: Arc<dyn Clock>,
    day_retention: usize,
    slot_retention: usize,
}

impl BackupEngine {
    /// 确保备份根目录存在并加载注册表；注册表缺失或损坏时从空开始（旧目录保留，不再被追踪）
    pub fn init(archive_root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, BackupError> {
        let archive_root = archive_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&archive_root)
            .map_err(BackupError::io("create archive root", &archive_root))?;

        let registry = match BackupRegistry::load(&BackupRegistry::path_in(&archive_root)) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "Backup registry unreadable, starting empty");
                BackupRegistry::default()
            }
        };
        tracing::info!(
            root = %archive_root.display(),
            days = registry.days.len(),
            slots = registry.slot_count(),
            "Backup registry loaded"
        );

        Ok(Self {
            archive_root,
            registry,
            clock,
            day_retention: DAY_RETENTION,
            slot_retention: SLOT_RETENTION,
        })
    }

    pub fn with_retention(mut self, days: usize, slots: usize) -> Self {
        self.day_retention = days.max(1);
        self.slot_retention = slots.max(1);
        self
    }

    pub fn registry(&self) -> &BackupRegistry {
        &self.registry
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// 将 source_dir 复制为一个新的快照，然后剪枝并持久化
    pub fn take_backup(&mut self, source_dir: impl AsRef<Path>) -> Result<SnapshotRef, BackupError> {
        let source_dir = source_dir.as_ref();
        let source = source_dir
            .canonicalize()
            .map_err(BackupError::io("read source", source_dir))?;
        // 目录名取调用方给出的路径（符号链接保留自身名字），`.` / `..` 才退回真实路径
        let basename = source_dir
            .file_name()
            .or_else(|| source.file_name())
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "save".into());

        let now = self.clock.now();
        let today = now.date_naive();
        let index = day_index(today);
        let label = now.format("%H-%M").to_string();

        let (pos, new_bucket) = match self.registry.days.iter().position(|d| d.day_index == index) {
            Some(pos) => (pos, false),
            None => {
                self.registry.days.push(DayBucket {
                    dir_name: today.format("%Y-%m-%d").to_string(),
                    day_index: index,
                    slots: Vec::new(),
                });
                (self.registry.days.len() - 1, true)
            }
        };

        let day_dir = self.registry.days[pos].dir_name.clone();
        let day_path = self.archive_root.join(&day_dir);
        let slot_path = day_path.join(&label);
        let day_existed = day_path.is_dir();
        let slot_existed = slot_path.is_dir();

        self.registry.days[pos].slots.push(Slot {
            label: label.clone(),
            created_at: now.timestamp(),
        });

        let dest = slot_path.join(&basename);
        let copied = std::fs::create_dir_all(&slot_path)
            .map_err(BackupError::io("create slot directory", &slot_path))
            .and_then(|_| copy_tree(&source, &dest));

        if let Err(e) = copied {
            // 撤销本次追加的元数据，只删除本次新建的目录
            self.registry.days[pos].slots.pop();
            if new_bucket {
                self.registry.days.remove(pos);
            }
            let created = [(!slot_existed, &slot_path), (!day_existed, &day_path)];
            for path in created.into_iter().filter_map(|(new, path)| new.then_some(path)) {
                if let Err(cleanup) = remove_tree(path) {
                    tracing::warn!(path = %path.display(), error = %cleanup, "Failed to clean up after backup failure");
                }
            }
            return Err(e);
        }

        tracing::info!(dest = %dest.display(), "Backup copied");

        self.prune();
        self.registry
            .save(&BackupRegistry::path_in(&self.archive_root))?;

        Ok(SnapshotRef {
            day_dir,
            label,
            path: dest,
        })
    }

    /// 先按日序号保留最近的桶，再在每个桶内按创建时间保留最近的快照；删除失败的条目保留在注册表中，下次重试
    fn prune(&mut self) {
        let root = &self.archive_root;
        let days = &mut self.registry.days;

        days.sort_by(|a, b| b.day_index.cmp(&a.day_index));
        if days.len() > self.day_retention {
            let evicted = days.split_off(self.day_retention);
            for day in evicted {
                let path = root.join(&day.dir_name);
                match remove_tree(&path) {
                    Ok(()) => tracing::info!(day = %day.dir_name, "Pruned backup day"),
                    Err(e) => {
                        tracing::warn!(day = %day.dir_name, error = %e, "Failed to prune backup day");
                        days.push(day);
                    }
                }
            }
            if days.len() > self.day_retention {
                tracing::error!(
                    days = days.len(),
                    retention = self.day_retention,
                    "Backup days exceed retention, undeletable days will be retried on the next backup"
                );
            }
        }

        for day in days.iter_mut() {
            day.slots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if day.slots.len() <= self.slot_retention {
                continue;
            }
            let evicted = day.slots.split_off(self.slot_retention);
            let mut failed = Vec::new();
            for slot in evicted {
                // 同一分钟的快照共用目录，仍被保留的快照引用时只丢弃元数据
                if day.slots.iter().any(|kept| kept.label == slot.label) {
                    continue;
                }
                let path = root.join(&day.dir_name).join(&slot.label);
                match remove_tree(&path) {
                    Ok(()) => tracing::info!(day = %day.dir_name, slot = %slot.label, "Pruned backup slot"),
                    Err(e) => {
                        tracing::warn!(slot = %path.display(), error = %e, "Failed to prune backup slot");
                        failed.push(slot);
                    }
                }
            }
            day.slots.extend(failed);
        }
    }
}

/// 递归复制目录树；目标已存在时合并并覆盖同名文件
fn copy_tree(src: &Path, dst: &Path) -> Result<(), BackupError> {
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            BackupError::Io {
                op: "walk source",
                path,
                source: e.into(),
            }
        })?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(BackupError::io("create directory", &target))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(BackupError::io("copy file", entry.path()))?;
        }
    }
    Ok(())
}

/// 删除目录树；目录已不存在视为成功
fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
