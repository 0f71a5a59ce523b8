//! 随机状态效果：可选的提示语 + `effect`

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::behaviors::{roll, Behavior, GameServer, Interval};
use crate::config::{EffectOption, EffectSection};
use crate::core::SupervisorError;

pub struct EffectBehavior {
    interval: Interval,
    chance: u32,
    effects: Vec<EffectOption>,
    rng: StdRng,
}

impl EffectBehavior {
    pub fn new(cfg: &EffectSection, rng: StdRng) -> Self {
        Self {
            interval: Interval::new(Duration::from_secs(cfg.interval_secs)),
            chance: cfg.chance,
            effects: cfg.effects.clone(),
            rng,
        }
    }
}

#[async_trait]
impl Behavior for EffectBehavior {
    fn name(&self) -> &str {
        "effect"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if self.effects.is_empty() || !self.interval.due() || !roll(&mut self.rng, self.chance) {
            return Ok(false);
        }
        let players = server.list_players().await?;
        let Some(player) = players.choose(&mut self.rng).cloned() else {
            return Ok(false);
        };
        let Ok(effect) = self
            .effects
            .choose_weighted(&mut self.rng, |e| e.weight.max(0.0))
            .cloned()
        else {
            return Ok(false);
        };
        self.interval.reset();
        tracing::info!(player = %player, effect = %effect.name, "Applying effect");
        if let Some(message) = &effect.message {
            let text = message.replace("{player}", &player);
            server.send_command(&format!("say {text}"), "").await?;
        }
        server
            .send_command(
                &format!("effect {player} {} {} {}", effect.name, effect.duration, effect.level),
                "",
            )
            .await?;
        Ok(true)
    }
}
