//! Rate-limited publishing of the user count to the bot description.

use crate::registry::UserRegistry;
use anyhow::Result;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(3600);

/// The external "set description" call.
#[async_trait]
pub trait DescriptionPublisher: Send + Sync {
    async fn publish(&self, description: &str) -> Result<()>;
}

/// Publishes through the Bot API `setMyDescription` method.
#[derive(Clone)]
pub struct BotDescriptionPublisher {
    bot: Bot,
}

impl BotDescriptionPublisher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DescriptionPublisher for BotDescriptionPublisher {
    async fn publish(&self, description: &str) -> Result<()> {
        self.bot
            .set_my_description()
            .description(description)
            .await?;
        Ok(())
    }
}

pub fn format_description(user_count: i64) -> String {
    format!("👥 Users: {user_count}")
}

/// Lets at most one successful publish through per `interval`.
///
/// `last_update` is process-local: after a restart the first attempt is always
/// eligible. Failed publishes leave it untouched so the next trigger retries.
#[derive(Debug)]
pub struct DescriptionThrottler {
    registry: UserRegistry,
    interval: Duration,
    last_update: Mutex<Option<Instant>>,
}

impl DescriptionThrottler {
    pub fn new(registry: UserRegistry, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            last_update: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn eligible(&self, last_update: Option<Instant>, now: Instant) -> bool {
        match last_update {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Whether an attempt at `now` would call the publisher. `false` while
    /// another update is in flight.
    pub fn is_eligible_at(&self, now: Instant) -> bool {
        match self.last_update.try_lock() {
            Ok(guard) => self.eligible(*guard, now),
            Err(_) => false,
        }
    }

    pub async fn maybe_update_description(&self, publisher: &dyn DescriptionPublisher) -> bool {
        self.maybe_update_description_at(Instant::now(), publisher)
            .await
    }

    /// Check, publish and record happen under one lock so two concurrent callers
    /// can never both publish. A caller that finds the lock taken backs off
    /// instead of queueing behind a slow Bot API call.
    pub async fn maybe_update_description_at(
        &self,
        now: Instant,
        publisher: &dyn DescriptionPublisher,
    ) -> bool {
        let Ok(mut last_update) = self.last_update.try_lock() else {
            debug!("description update skipped (update in flight)");
            return false;
        };
        if !self.eligible(*last_update, now) {
            debug!("description update skipped (rate limit)");
            return false;
        }

        let description = format_description(self.registry.get_user_count().await);
        match publisher.publish(&description).await {
            Ok(()) => {
                *last_update = Some(now);
                info!(%description, "bot description updated");
                true
            }
            Err(err) => {
                warn!(?err, "failed to update bot description");
                false
            }
        }
    }
}
