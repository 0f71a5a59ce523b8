//! 定时保存与备份

use std::time::Duration;

use async_trait::async_trait;

use crate::behaviors::{Behavior, GameServer, Interval};
use crate::core::SupervisorError;

pub struct AutosaveBehavior {
    interval: Interval,
}

impl AutosaveBehavior {
    pub fn new(every: Duration) -> Self {
        Self {
            interval: Interval::new(every),
        }
    }
}

#[async_trait]
impl Behavior for AutosaveBehavior {
    fn name(&self) -> &str {
        "autosave"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if !self.interval.due() {
            return Ok(false);
        }
        self.interval.reset();
        tracing::info!("Saving game");
        server.save_game().await?;
        tracing::info!("Save complete");
        Ok(true)
    }
}
