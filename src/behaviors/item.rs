//! 随机物品：悄悄话 + `give`

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::Rng;

use crate::behaviors::{roll, Behavior, GameServer, Interval};
use crate::config::{ItemOption, ItemSection};
use crate::core::SupervisorError;

pub struct ItemBehavior {
    interval: Interval,
    chance: u32,
    message: String,
    items: Vec<ItemOption>,
    rng: StdRng,
}

impl ItemBehavior {
    pub fn new(cfg: &ItemSection, rng: StdRng) -> Self {
        Self {
            interval: Interval::new(Duration::from_secs(cfg.interval_secs)),
            chance: cfg.chance,
            message: cfg.message.clone(),
            items: cfg.items.clone(),
            rng,
        }
    }
}

/// 按权重选一项，数量在 [min_qty, max_qty] 内
pub(crate) fn pick_weighted(options: &[ItemOption], rng: &mut StdRng) -> Option<(String, u32)> {
    let option = options.choose_weighted(rng, |o| o.weight.max(0.0)).ok()?;
    let (lo, hi) = (option.min_qty.min(option.max_qty), option.min_qty.max(option.max_qty));
    Some((option.name.clone(), rng.random_range(lo..=hi)))
}

#[async_trait]
impl Behavior for ItemBehavior {
    fn name(&self) -> &str {
        "item"
    }

    async fn attempt(&mut self, server: &mut dyn GameServer) -> Result<bool, SupervisorError> {
        if self.items.is_empty() || !self.interval.due() || !roll(&mut self.rng, self.chance) {
            return Ok(false);
        }
        let players = server.list_players().await?;
        let Some(player) = players.choose(&mut self.rng).cloned() else {
            return Ok(false);
        };
        let Some((item, qty)) = pick_weighted(&self.items, &mut self.rng) else {
            return Ok(false);
        };
        self.interval.reset();
        tracing::info!(player = %player, item = %item, qty, "Giving item");
        server
            .send_command(&format!("tell {player} {}", self.message), "")
            .await?;
        server.send_command(&format!("give {player} {item} {qty}"), "").await?;
        Ok(true)
    }
}
