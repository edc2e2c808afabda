//! Persistent registry of every user that has interacted with the bot.
//!
//! Only [`UserRegistry::initialize`] can fail; every other operation logs the
//! error and degrades to a safe default (`false`, `0`, empty stats) because the
//! registry is telemetry and must never break a download.

use crate::db::{self, Pool, UserStats};
use crate::export;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct UserRegistry {
    pool: Pool,
}

impl UserRegistry {
    /// Opens (or creates) the store at `storage_location` and applies migrations.
    pub async fn initialize(storage_location: &str) -> Result<Self> {
        let pool = db::init_pool(storage_location).await?;
        db::run_migrations(&pool)
            .await
            .context("failed to create registry tables")?;
        info!(storage = storage_location, "user registry initialized");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// `true` when the user was recorded by this call. `false` means either the
    /// id was already known or the write failed, so it is not proof of prior existence.
    pub async fn add_user(
        &self,
        user_id: i64,
        first_name: Option<&str>,
        username: Option<&str>,
    ) -> bool {
        match db::insert_user_if_absent(&self.pool, user_id, first_name, username).await {
            Ok(true) => {
                info!(user_id, username = username.unwrap_or_default(), "new user added");
                true
            }
            Ok(false) => {
                debug!(user_id, "user already tracked");
                false
            }
            Err(err) => {
                error!(?err, user_id, "failed to add user");
                false
            }
        }
    }

    pub async fn get_user_count(&self) -> i64 {
        db::count_users(&self.pool).await.unwrap_or_else(|err| {
            error!(?err, "failed to get user count");
            0
        })
    }

    pub async fn get_user_stats(&self) -> UserStats {
        db::user_stats(&self.pool, Utc::now())
            .await
            .unwrap_or_else(|err| {
                error!(?err, "failed to get user stats");
                UserStats::default()
            })
    }

    /// Writes every user, newest first, to `destination`. Returns whether the
    /// file was written.
    pub async fn export_users(&self, destination: &Path) -> bool {
        let users = match db::list_users_newest_first(&self.pool).await {
            Ok(users) => users,
            Err(err) => {
                error!(?err, "failed to load users for export");
                return false;
            }
        };
        match export::write_users_csv(destination, &users).await {
            Ok(()) => {
                info!(path = %destination.display(), users = users.len(), "users exported");
                true
            }
            Err(err) => {
                error!(?err, path = %destination.display(), "failed to export users");
                false
            }
        }
    }
}
