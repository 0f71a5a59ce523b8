//! 运行周期：启动 → 等待就绪 → 周期行为 → 有序停止；外层循环在意外退出后重启

use std::path::PathBuf;
use std::time::Duration;

use crate::backup::BackupEngine;
use crate::behaviors::{BehaviorSet, Session};
use crate::config::AppConfig;
use crate::core::shutdown::{sleep_or_cancelled, KillSwitch};
use crate::core::supervisor::{LaunchSpec, ProcessSupervisor, SupervisorSettings};
use crate::core::SupervisorError;

/// 一轮运行的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// 停止请求（信号或 kill 文件），不再重启
    Requested,
    /// 服务器自行退出或行为关键失败
    Unexpected,
}

/// 运行所需的全部上下文
pub struct LifetimeContext {
    pub config: AppConfig,
    pub kill: KillSwitch,
    pub backups: BackupEngine,
    /// 被备份的存档目录
    pub save_path: PathBuf,
}

impl LifetimeContext {
    fn end(&self) -> RunEnd {
        if self.kill.is_killed() {
            RunEnd::Requested
        } else {
            RunEnd::Unexpected
        }
    }
}

/// 执行一轮完整的服务器运行；启动失败时直接返回错误（没有可停止的进程）
pub async fn lifetime(ctx: &mut LifetimeContext) -> Result<RunEnd, SupervisorError> {
    let launch = LaunchSpec::from_config(&ctx.config);
    let settings = SupervisorSettings::from_config(&ctx.config);
    let mut server = ProcessSupervisor::start(&launch, settings, &ctx.kill).await?;
    tracing::info!(pid = ?server.pid(), "Server started");

    let result = drive(ctx, &mut server).await;

    if server.is_alive() {
        let save_all = server.protocol().save_all_command.clone();
        match server.send_command(&save_all, "").await {
            Ok(_) => {}
            // 已写入命令，只是不再等待输出
            Err(e) if e.is_kill() => tracing::debug!("Final save sent without waiting"),
            Err(e) => tracing::warn!(error = %e, "Final save failed"),
        }
    }
    tracing::info!("Stopping server");
    server.stop().await;

    match result {
        Ok(()) => Ok(ctx.end()),
        Err(e) if e.is_kill() => Ok(RunEnd::Requested),
        Err(e) => Err(e),
    }
}

async fn drive(ctx: &mut LifetimeContext, server: &mut ProcessSupervisor) -> Result<(), SupervisorError> {
    let startup_delay = Duration::from_secs(ctx.config.server.startup_delay_secs);
    if !server.sleep(startup_delay).await {
        return Ok(());
    }
    tracing::info!(log = %ctx.config.server.log_path().display(), "Waiting for server to be ready");
    server.wait_ready().await?;
    tracing::info!("Server ready");

    let mut behaviors = BehaviorSet::from_config(&ctx.config);
    tracing::info!(behaviors = ?behaviors.names(), "Behaviors loaded");
    let tick = ctx.config.tick();

    while server.should_run() {
        server.sleep(tick).await;
        if !server.should_run() {
            break;
        }
        let mut session = Session {
            server: &mut *server,
            backups: &mut ctx.backups,
            save_path: &ctx.save_path,
        };
        behaviors.update(&mut session).await?;
    }
    if !server.is_alive() && !server.was_killed() {
        tracing::warn!("Server exited on its own");
    }
    Ok(())
}

/// 反复运行直到收到停止请求；意外结束后等待 restart_delay 再重启
pub async fn run_forever(ctx: &mut LifetimeContext) {
    let restart_delay = Duration::from_secs(ctx.config.server.restart_delay_secs);
    let token = ctx.kill.token();
    let mut runs: u64 = 0;
    while !ctx.kill.is_killed() {
        runs += 1;
        match lifetime(ctx).await {
            Ok(RunEnd::Requested) => break,
            Ok(RunEnd::Unexpected) => tracing::warn!(run = runs, "Server run ended unexpectedly"),
            Err(e) => tracing::error!(run = runs, error = %e, "Server run failed"),
        }
        if ctx.kill.is_killed() {
            break;
        }
        tracing::info!(delay_secs = restart_delay.as_secs(), "Restarting server");
        if !sleep_or_cancelled(&token, restart_delay).await {
            break;
        }
    }
    tracing::info!(reason = ?ctx.kill.reason(), "Manager shutting down");
}
