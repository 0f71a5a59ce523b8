//! 周期行为：按间隔 + 概率触发的服务器命令（自动备份、送物品、说话、效果、召唤、音效）
//!
//! 所有行为实现 Behavior trait，由 BehaviorSet 按配置组装；每次 tick 依次尝试。
//! 非关键行为失败时补发一次 save-all / save-on 后继续；关键行为失败或服务器已停止时结束本轮运行。

pub mod autosave;
pub mod creeper;
pub mod effect;
pub mod item;
pub mod summon;
pub mod talk;

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backup::BackupEngine;
use crate::config::AppConfig;
use crate::core::{ProcessSupervisor, SupervisorError};

pub use autosave::AutosaveBehavior;
pub use creeper::CreeperBehavior;
pub use effect::EffectBehavior;
pub use item::ItemBehavior;
pub use summon::SummonBehavior;
pub use talk::TalkBehavior;

/// 行为可以使用的服务器能力
#[async_trait]
pub trait GameServer: Send {
    /// 发送命令并等待标记行；空标记表示等待任意一行
    async fn send_command(&mut self, command: &str, marker: &str) -> Result<String, SupervisorError>;

    async fn list_players(&mut self) -> Result<Vec<String>, SupervisorError>;

    /// 保存并备份存档
    async fn save_game(&mut self) -> Result<(), SupervisorError>;

    /// 行为失败后补发 save-all / save-on，避免自动保存停留在关闭状态
    async fn defensive_save(&mut self) -> Result<(), SupervisorError>;

    /// 可中断等待；被停止请求打断时返回 false
    async fn pause(&mut self, duration: Duration) -> bool;

    fn is_alive(&mut self) -> bool;
}

/// 驱动循环中的一次会话：服务器 + 备份引擎 + 存档目录
pub struct Session<'a> {
    pub server: &'a mut ProcessSupervisor,
    pub backups: &'a mut BackupEngine,
    pub save_path: &'a Path,
}

#[async_trait]
impl<'a> GameServer for Session<'a> {
    async fn send_command(&mut self, command: &str, marker: &str) -> Result<String, SupervisorError> {
        self.server.send_command(command, marker).await
    }

    async fn list_players(&mut self) -> Result<Vec<String>, SupervisorError> {
        self.server.list_players().await
    }

    async fn save_game(&mut self) -> Result<(), SupervisorError> {
        self.server.save_game(self.backups, self.save_path).await
    }

    async fn defensive_save(&mut self) -> Result<(), SupervisorError> {
        let p = self.server.protocol().clone();
        self.server.send_command(&p.save_all_command, "").await?;
        self.server.send_command(&p.save_on_command, "").await?;
        Ok(())
    }

    async fn pause(&mut self, duration: Duration) -> bool {
        self.server.sleep(duration).await
    }

    fn is_alive(&mut self) -> bool {
        self.server.is_alive()
    }
}

/// 周期行为
#[async_trait]
pub trait Behavior: Send {
    fn name(&self) -> &str;

    /// 关键行为失败会结束本轮运行
    fn is_critical(&self) -> bool {
        false
    }

    /// 根据自身计时器尝试执行；执行了返回 true
    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError>;
}

/// 一次尝试的结果分类
#[derive(Debug)]
pub enum Outcome {
    Idle,
    Acted,
    FailedNoncritical(SupervisorError),
    FailedCritical(SupervisorError),
}

/// 执行一次行为并分类结果；停止请求、服务器退出与关键行为的失败都视为关键失败
pub async fn run_behavior(behavior: &mut dyn Behavior, server: &mut dyn GameServer) -> Outcome {
    match behavior.attempt(server).await {
        Ok(true) => Outcome::Acted,
        Ok(false) => Outcome::Idle,
        Err(e) => {
            tracing::error!(behavior = %behavior.name(), error = %e, "Behavior failed");
            if behavior.is_critical() || e.is_kill() || !server.is_alive() {
                Outcome::FailedCritical(e)
            } else {
                Outcome::FailedNoncritical(e)
            }
        }
    }
}

/// 按配置组装的行为列表
#[derive(Default)]
pub struct BehaviorSet {
    behaviors: Vec<Box<dyn Behavior>>,
}

impl BehaviorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, behavior: impl Behavior + 'static) {
        self.behaviors.push(Box::new(behavior));
    }

    pub fn names(&self) -> Vec<String> {
        self.behaviors.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// 按 [behaviors.*] 段组装已启用的行为
    pub fn from_config(cfg: &AppConfig) -> Self {
        let b = &cfg.behaviors;
        let mut set = Self::new();
        if b.autosave.enabled {
            set.register(AutosaveBehavior::new(Duration::from_secs(cfg.backup.interval_secs)));
        }
        if b.item.enabled {
            set.register(ItemBehavior::new(&b.item, rng()));
        }
        if b.talk.enabled {
            set.register(TalkBehavior::new(&b.talk, rng()));
        }
        if b.effect.enabled {
            set.register(EffectBehavior::new(&b.effect, rng()));
        }
        if b.summon.enabled {
            set.register(SummonBehavior::new(&b.summon, rng()));
        }
        if b.creeper.enabled {
            set.register(CreeperBehavior::new(&b.creeper, rng()));
        }
        set
    }

    /// 依次尝试所有行为；非关键失败时补发保存命令，关键失败返回错误
    pub async fn update(&mut self, server: &mut dyn GameServer) -> Result<(), SupervisorError> {
        for behavior in self.behaviors.iter_mut() {
            match run_behavior(behavior.as_mut(), server).await {
                Outcome::Idle => {}
                Outcome::Acted => tracing::debug!(behavior = %behavior.name(), "Behavior acted"),
                Outcome::FailedNoncritical(_) => server.defensive_save().await?,
                Outcome::FailedCritical(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn rng() -> StdRng {
    StdRng::from_os_rng()
}

/// 行为计时器：从创建时刻开始计时，只有执行后才重置
#[derive(Debug, Clone, Copy)]
pub struct Interval {
    every: Duration,
    last: Instant,
}

impl Interval {
    pub fn new(every: Duration) -> Self {
        Self {
            every,
            last: Instant::now(),
        }
    }

    pub fn due(&self) -> bool {
        self.last.elapsed() >= self.every
    }

    pub fn reset(&mut self) {
        self.last = Instant::now();
    }
}

/// 以百分比概率掷骰
pub(crate) fn roll(rng: &mut StdRng, chance: u32) -> bool {
    rng.random_range(0..100) < chance
}
