//! 苦力怕引信音效恶作剧

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;

use crate::behaviors::{roll, Behavior, GameServer, Interval};
use crate::config::CreeperSection;
use crate::core::SupervisorError;

const HISS: &str = "execute @a ~ ~ ~-3 /playsound entity.creeper.primed hostile @s ~ ~ ~-3 1 0.5";

pub struct CreeperBehavior {
    interval: Interval,
    chance: u32,
    rng: StdRng,
}

impl CreeperBehavior {
    pub fn new(cfg: &CreeperSection, rng: StdRng) -> Self {
        Self {
            interval: Interval::new(Duration::from_secs(cfg.interval_secs)),
            chance: cfg.chance,
            rng,
        }
    }
}

#[async_trait]
impl Behavior for CreeperBehavior {
    fn name(&self) -> &str {
        "creeper"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if !self.interval.due() || !roll(&mut self.rng, self.chance) {
            return Ok(false);
        }
        self.interval.reset();
        server.send_command(HISS, "").await?;
        Ok(true)
    }
}
