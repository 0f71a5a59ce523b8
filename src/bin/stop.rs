//! 请求守护进程停止：向 kill 文件追加一条短期有效的停止请求

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use warden::config::{load_config, DEFAULT_CONFIG_PATH};
use warden::control::request_stop;

#[derive(Parser, Debug)]
#[command(name = "warden-stop", about = "Ask a running warden to stop the server")]
struct Cli {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(Some(cli.config)).context("Failed to load config")?;
    cfg.absolutize(&std::env::current_dir()?);

    let kill_file = cfg.control.kill_file();
    let deadline = request_stop(&kill_file, cfg.control.kill_validity_secs)?;
    println!("Stop requested via {} (valid until {deadline:.3})", kill_file.display());
    Ok(())
}
