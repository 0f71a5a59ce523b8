//! 召唤生物：先警告，等待片刻后在玩家身边生成

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::behaviors::item::pick_weighted;
use crate::behaviors::{roll, Behavior, GameServer, Interval};
use crate::config::{ItemOption, SummonSection};
use crate::core::SupervisorError;

pub struct SummonBehavior {
    interval: Interval,
    chance: u32,
    warning: Duration,
    creatures: Vec<ItemOption>,
    rng: StdRng,
}

impl SummonBehavior {
    pub fn new(cfg: &SummonSection, rng: StdRng) -> Self {
        Self {
            interval: Interval::new(Duration::from_secs(cfg.interval_secs)),
            chance: cfg.chance,
            warning: Duration::from_secs(cfg.warning_secs),
            creatures: cfg.creatures.clone(),
            rng,
        }
    }
}

#[async_trait]
impl Behavior for SummonBehavior {
    fn name(&self) -> &str {
        "summon"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if self.creatures.is_empty() || !self.interval.due() || !roll(&mut self.rng, self.chance) {
            return Ok(false);
        }
        let players = server.list_players().await?;
        let Some(player) = players.choose(&mut self.rng).cloned() else {
            return Ok(false);
        };
        let Some((creature, qty)) = pick_weighted(&self.creatures, &mut self.rng) else {
            return Ok(false);
        };
        self.interval.reset();
        tracing::info!(player = %player, creature = %creature, qty, "Summoning");
        server
            .send_command(&format!("say {player} better watch out..."), "")
            .await?;
        if !server.pause(self.warning).await {
            return Err(SupervisorError::KilledWhileWaiting {
                marker: String::new(),
            });
        }
        for _ in 0..qty {
            server
                .send_command(&format!("execute {player} ~ ~ ~ /summon {creature}"), "")
                .await?;
        }
        Ok(true)
    }
}
