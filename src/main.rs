//! Warden - 游戏服务器守护进程
//!
//! 入口：加载配置、切换到服务器目录、初始化日志、写入 pid，然后反复运行服务器直到收到停止请求。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use warden::backup::{BackupEngine, SystemClock};
use warden::config::{load_config, resolve_save_path, write_default_config, DEFAULT_CONFIG_PATH};
use warden::control::write_pid;
use warden::core::{run_forever, KillSwitch, LifetimeContext};
use warden::observability;

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Game server supervisor with rotating backups")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if write_default_config(&cli.config)? {
        eprintln!("Wrote default config to {}", cli.config.display());
    }
    let mut cfg = load_config(Some(cli.config.clone()))
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    cfg.absolutize(&cwd);

    let save_path = resolve_save_path(&cfg.server.path)?;
    std::env::set_current_dir(&cfg.server.path)
        .with_context(|| format!("Failed to enter server directory {}", cfg.server.path.display()))?;

    let log_path = observability::init(Some(&cfg.logging.dir), cfg.logging.keep_files)
        .context("Failed to initialize logging")?;
    tracing::info!(
        server = %cfg.server.path.display(),
        save = %save_path.display(),
        log = ?log_path,
        "Manager starting"
    );

    write_pid(&cfg.control.pid_file()).context("Failed to write pid file")?;

    let kill = KillSwitch::new();
    kill.install_signal_handlers();

    let backups = BackupEngine::init(&cfg.backup.path, Arc::new(SystemClock))
        .context("Failed to open backup archive")?
        .with_retention(cfg.backup.day_retention, cfg.backup.slot_retention);

    let mut ctx = LifetimeContext {
        config: cfg,
        kill,
        backups,
        save_path,
    };
    run_forever(&mut ctx).await;
    Ok(())
}
