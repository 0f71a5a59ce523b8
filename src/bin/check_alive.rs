//! 存活检查：pid 文件记录的守护进程不在时重新拉起（适合放进 cron）

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;
use clap::Parser;
use warden::config::{load_config, DEFAULT_CONFIG_PATH};
use warden::control::{pid_alive, read_pid};

#[derive(Parser, Debug)]
#[command(name = "warden-check", about = "Relaunch warden if it is not running")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn manager_exe() -> anyhow::Result<PathBuf> {
    let me = std::env::current_exe().context("Failed to locate current executable")?;
    let name = format!("warden{}", std::env::consts::EXE_SUFFIX);
    Ok(me.parent().map(|dir| dir.join(&name)).unwrap_or_else(|| PathBuf::from(name)))
}

fn relaunch(config: &Path) -> anyhow::Result<u32> {
    let exe = manager_exe()?;
    let mut cmd = Command::new(&exe);
    cmd.arg("--config")
        .arg(config)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to launch {}", exe.display()))?;
    Ok(child.id())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;
    let mut cfg = load_config(Some(cli.config.clone())).context("Failed to load config")?;
    cfg.absolutize(&cwd);

    let pid_file = cfg.control.pid_file();
    match read_pid(&pid_file) {
        Some(pid) if pid_alive(pid) => {
            println!("warden is running (pid {pid})");
            return Ok(());
        }
        Some(pid) => println!("warden pid {pid} is gone, relaunching"),
        None => println!("No pid in {}, launching", pid_file.display()),
    }
    let config = if cli.config.is_relative() {
        cwd.join(&cli.config)
    } else {
        cli.config
    };
    let pid = relaunch(&config)?;
    println!("Launched warden (pid {pid})");
    Ok(())
}
