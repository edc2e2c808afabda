//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Policy (fail-soft
//! defaults, logging) lives in `crate::registry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One distinct person who has interacted with the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: i64,
    pub first_name: Option<String>,
    pub username: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// Aggregate view over the `users` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_users: i64,
    /// Users first seen within the trailing 24 hours.
    pub users_today: i64,
    pub first_user_date: Option<DateTime<Utc>>,
}
