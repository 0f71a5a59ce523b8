//! 应用配置：从 config/warden.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WARDEN__*` 覆盖（双下划线表示嵌套，如 `WARDEN__BACKUP__INTERVAL_SECS=600`）。
//! 每个字段都有 serde 默认值，缺失的段落或字段逐项回退到默认。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 当前配置格式版本
pub const CONFIG_VERSION: u32 = 1;

/// 应用配置根（对应 config/warden.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub server: ServerSection,
    pub backup: BackupSection,
    pub control: ControlSection,
    pub logging: LoggingSection,
    pub protocol: ProtocolSection,
    pub behaviors: BehaviorsSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            server: ServerSection::default(),
            backup: BackupSection::default(),
            control: ControlSection::default(),
            logging: LoggingSection::default(),
            protocol: ProtocolSection::default(),
            behaviors: BehaviorsSection::default(),
        }
    }
}

/// [server] 段：启动命令、工作目录、日志文件与各类超时
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// 服务器目录（子进程工作目录，也是守护进程运行时的当前目录）
    pub path: PathBuf,
    pub start_command: Vec<String>,
    /// 服务器追加写入的日志文件，相对路径基于 `path`
    pub log_file: PathBuf,
    /// 启动后多久检查子进程是否已退出
    pub launch_grace_ms: u64,
    /// 启动后等待日志文件就绪的时间
    pub startup_delay_secs: u64,
    pub ready_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// 日志无新行时的重试间隔
    pub poll_interval_ms: u64,
    /// 单条命令最多等待的日志行数
    pub max_lines: usize,
    /// 主循环每次睡眠的时长
    pub tick_secs: u64,
    /// 非请求退出后重启前的等待
    pub restart_delay_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/galacticraft"),
            start_command: [
                "java",
                "-Xmx8G",
                "-Dfml.queryResult=confirm",
                "-jar",
                "forge-server.jar",
                "nogui",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            log_file: PathBuf::from("logs/latest.log"),
            launch_grace_ms: 1000,
            startup_delay_secs: 3,
            ready_timeout_secs: 180,
            command_timeout_secs: 30,
            poll_interval_ms: 1000,
            max_lines: crate::core::channel::MAX_LINES,
            tick_secs: 5,
            restart_delay_secs: 5,
        }
    }
}

impl ServerSection {
    pub fn log_path(&self) -> PathBuf {
        self.path.join(&self.log_file)
    }
}

/// [backup] 段：备份根目录、间隔与保留数量
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackupSection {
    pub path: PathBuf,
    pub interval_secs: u64,
    pub day_retention: usize,
    pub slot_retention: usize,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("backups"),
            interval_secs: 20 * 60,
            day_retention: crate::backup::DAY_RETENTION,
            slot_retention: crate::backup::SLOT_RETENTION,
        }
    }
}

/// [control] 段：pid 文件与 kill 文件所在目录
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlSection {
    pub dir: PathBuf,
    /// 停止请求的有效期
    pub kill_validity_secs: f64,
    pub kill_poll_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("config"),
            kill_validity_secs: 10.0,
            kill_poll_ms: 1000,
        }
    }
}

impl ControlSection {
    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("pid.txt")
    }

    pub fn kill_file(&self) -> PathBuf {
        self.dir.join("kill.txt")
    }
}

/// [logging] 段：守护进程自身的日志目录，相对路径基于服务器目录
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub dir: PathBuf,
    pub keep_files: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("manager_logs"),
            keep_files: 7,
        }
    }
}

/// [protocol] 段：命令与日志标记（子串匹配）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolSection {
    pub ready_marker: String,
    pub stop_command: String,
    pub save_off_command: String,
    pub save_off_marker: String,
    pub save_all_command: String,
    pub save_all_marker: String,
    pub save_on_command: String,
    pub save_on_marker: String,
    pub list_command: String,
    pub list_marker: String,
    /// 玩家名单行中名字列表之前的前缀
    pub list_prefix: String,
}

impl Default for ProtocolSection {
    fn default() -> Self {
        Self {
            ready_marker: "DedicatedServer]: Done".into(),
            stop_command: "stop".into(),
            save_off_command: "save-off".into(),
            save_off_marker: "Turned off world auto-saving".into(),
            save_all_command: "save-all".into(),
            save_all_marker: "Saved the world".into(),
            save_on_command: "save-on".into(),
            save_on_marker: "Turned on world auto-saving".into(),
            list_command: "list".into(),
            list_marker: " players online:".into(),
            list_prefix: "DedicatedServer]:".into(),
        }
    }
}

/// 带权重的随机物品
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ItemOption {
    pub name: String,
    pub weight: f64,
    pub min_qty: u32,
    pub max_qty: u32,
}

/// 带权重的状态效果；message 中的 `{player}` 会被替换
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EffectOption {
    pub name: String,
    pub weight: f64,
    pub duration: u32,
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// [behaviors] 段：各随机事件的开关、间隔与概率
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BehaviorsSection {
    pub autosave: AutosaveSection,
    pub item: ItemSection,
    pub talk: TalkSection,
    pub effect: EffectSection,
    pub summon: SummonSection,
    pub creeper: CreeperSection,
}

/// [behaviors.autosave]：间隔取 backup.interval_secs
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutosaveSection {
    pub enabled: bool,
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ItemSection {
    pub enabled: bool,
    pub interval_secs: u64,
    /// 触发概率（百分比）
    pub chance: u32,
    pub message: String,
    pub items: Vec<ItemOption>,
}

impl Default for ItemSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60 * 60,
            chance: 70,
            message: "Keep this between us".into(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TalkSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub chance: u32,
    pub phrases: Vec<String>,
}

impl Default for TalkSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 40 * 60,
            chance: 40,
            phrases: [
                "A horse is a horse of course of course",
                "Make the tent big enough",
                "This is the most advanced space game",
                "Alt+F4 for diamonds",
                "BED",
                "Criticality detected. Reactor meltdown imminent. Evacuate to a safe distance",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EffectSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub chance: u32,
    pub effects: Vec<EffectOption>,
}

impl Default for EffectSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60 * 60,
            chance: 40,
            effects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SummonSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub chance: u32,
    /// 警告与召唤之间的间隔
    pub warning_secs: u64,
    pub creatures: Vec<ItemOption>,
}

impl Default for SummonSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 90 * 60,
            chance: 40,
            warning_secs: 5,
            creatures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CreeperSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub chance: u32,
}

impl Default for CreeperSection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30 * 60,
            chance: 20,
        }
    }
}

impl AppConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.server.command_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.server.tick_secs)
    }

    /// 将相对路径固定为绝对路径（守护进程随后会切换到服务器目录）
    pub fn absolutize(&mut self, base: &Path) {
        for path in [
            &mut self.server.path,
            &mut self.backup.path,
            &mut self.control.dir,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        if self.logging.dir.is_relative() {
            self.logging.dir = self.server.path.join(&self.logging.dir);
        }
    }
}

/// 默认配置文件位置
pub const DEFAULT_CONFIG_PATH: &str = "config/warden.toml";

/// 从 config 目录加载配置，环境变量 WARDEN__* 可覆盖
///
/// 1. 按顺序查找 config/warden.toml、../config/warden.toml、warden.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WARDEN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/warden", "../config/warden", "warden"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WARDEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 配置文件不存在时写出默认配置，返回是否写入
pub fn write_default_config(path: &Path) -> anyhow::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&AppConfig::default())?)?;
    Ok(true)
}

/// 从 server.properties 的 `level-name` 推导存档目录
pub fn resolve_save_path(server_path: &Path) -> anyhow::Result<PathBuf> {
    let props_path = server_path.join("server.properties");
    let props = std::fs::read_to_string(&props_path).map_err(|e| {
        anyhow::anyhow!("Bad config, failed to read {}: {}", props_path.display(), e)
    })?;
    level_name(&props)
        .map(|name| server_path.join(name))
        .ok_or_else(|| anyhow::anyhow!("level-name missing from {}", props_path.display()))
}

fn level_name(props: &str) -> Option<&str> {
    props
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| line.strip_prefix("level-name="))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.server.max_lines, 10_000);
        assert_eq!(cfg.backup.interval_secs, 1200);
        assert_eq!(cfg.backup.day_retention, 5);
        assert_eq!(cfg.control.kill_file(), PathBuf::from("config/kill.txt"));
        assert!(cfg.behaviors.autosave.enabled);
        assert!(!cfg.behaviors.summon.enabled);
    }

    #[test]
    fn test_partial_toml_falls_back_field_by_field() {
        let text = r#"
            [server]
            path = "/srv/mc"
            tick_secs = 10

            [behaviors.talk]
            phrases = ["hello"]
        "#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.server.path, PathBuf::from("/srv/mc"));
        assert_eq!(cfg.server.tick_secs, 10);
        assert_eq!(cfg.server.command_timeout_secs, 30);
        assert_eq!(cfg.behaviors.talk.phrases, vec!["hello".to_string()]);
        assert_eq!(cfg.behaviors.talk.chance, 40);
        assert_eq!(cfg.protocol.save_all_marker, "Saved the world");
    }

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("warden.toml");
        assert!(write_default_config(&path).unwrap());
        assert!(!write_default_config(&path).unwrap());

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.server.start_command, ServerSection::default().start_command);
    }

    #[test]
    fn test_level_name() {
        let props = "#Minecraft server properties\nmotd=hi\nlevel-name=world\n";
        assert_eq!(level_name(props), Some("world"));
        assert_eq!(level_name("motd=hi\n"), None);
        assert_eq!(level_name("level-name=\n"), None);
    }

    #[test]
    fn test_resolve_save_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("server.properties"), "level-name=galaxy\n").unwrap();
        assert_eq!(resolve_save_path(dir.path()).unwrap(), dir.path().join("galaxy"));
        assert!(resolve_save_path(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_absolutize() {
        let mut cfg = AppConfig::default();
        cfg.server.path = PathBuf::from("server");
        cfg.absolutize(Path::new("/base"));
        assert_eq!(cfg.server.path, PathBuf::from("/base/server"));
        assert_eq!(cfg.backup.path, PathBuf::from("/base/backups"));
        assert_eq!(cfg.control.dir, PathBuf::from("/base/config"));
        assert_eq!(cfg.logging.dir, PathBuf::from("/base/server/manager_logs"));
    }
}
