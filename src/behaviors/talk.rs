//! 随机台词：`say <phrase>`

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;

use crate::behaviors::{roll, Behavior, GameServer, Interval};
use crate::config::TalkSection;
use crate::core::SupervisorError;

pub struct TalkBehavior {
    interval: Interval,
    chance: u32,
    phrases: Vec<String>,
    rng: StdRng,
}

impl TalkBehavior {
    pub fn new(cfg: &TalkSection, rng: StdRng) -> Self {
        Self {
            interval: Interval::new(Duration::from_secs(cfg.interval_secs)),
            chance: cfg.chance,
            phrases: cfg.phrases.clone(),
            rng,
        }
    }
}

#[async_trait]
impl Behavior for TalkBehavior {
    fn name(&self) -> &str {
        "talk"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if !self.interval.due() || !roll(&mut self.rng, self.chance) {
            return Ok(false);
        }
        let Some(phrase) = self.phrases.choose(&mut self.rng).cloned() else {
            return Ok(false);
        };
        self.interval.reset();
        server.send_command(&format!("say {phrase}"), "").await?;
        Ok(true)
    }
}
