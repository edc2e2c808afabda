use super::model::{UserRecord, UserStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;
type UserRow = (i64, Option<String>, Option<String>, NaiveDateTime);

/// Matches the `first_seen` column default so string comparison orders correctly.
const SQL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = normalize_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url: {database_url}"))?
        .create_if_missing(true)
        // WAL lets readers proceed while a handler is inserting.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database: {database_url}"))?;
    Ok(pool)
}

/// Accepts `sqlite:` URLs or bare file paths. For file-backed databases a leading
/// `~/` is expanded and the parent directory is created. In-memory URLs pass through.
fn normalize_sqlite_url(url: &str) -> String {
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let without_scheme = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let (path, query) = match without_scheme.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (without_scheme, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    };

    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn sql_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(SQL_TIMESTAMP_FORMAT).to_string()
}

/// Inserts the user unless the id is already present. Returns `true` only when a
/// row was written; a concurrent insert of the same id that loses the race
/// reports `false` because the primary key turns it into a no-op.
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn insert_user_if_absent(
    pool: &Pool,
    user_id: i64,
    first_name: Option<&str>,
    username: Option<&str>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO users (user_id, first_name, username) VALUES (?, ?, ?) ON CONFLICT(user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(first_name)
    .bind(username)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn find_user(pool: &Pool, user_id: i64) -> Result<Option<UserRecord>> {
    let row: Option<UserRow> = sqlx::query_as(
        "SELECT user_id, first_name, username, first_seen FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(into_record))
}

#[instrument(skip_all)]
pub async fn count_users(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn count_users_since(pool: &Pool, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE first_seen > ?")
        .bind(sql_timestamp(since))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn earliest_first_seen(pool: &Pool) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<NaiveDateTime> = sqlx::query_scalar("SELECT MIN(first_seen) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(ts.map(|t| t.and_utc()))
}

/// Aggregates relative to `now`; "today" is the trailing 24 hours.
#[instrument(skip_all)]
pub async fn user_stats(pool: &Pool, now: DateTime<Utc>) -> Result<UserStats> {
    Ok(UserStats {
        total_users: count_users(pool).await?,
        users_today: count_users_since(pool, now - Duration::hours(24)).await?,
        first_user_date: earliest_first_seen(pool).await?,
    })
}

#[instrument(skip_all)]
pub async fn list_users_newest_first(pool: &Pool) -> Result<Vec<UserRecord>> {
    let rows: Vec<UserRow> = sqlx::query_as(
        "SELECT user_id, first_name, username, first_seen FROM users ORDER BY first_seen DESC, user_id DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(into_record).collect())
}

fn into_record((user_id, first_name, username, first_seen): UserRow) -> UserRecord {
    UserRecord {
        user_id,
        first_name,
        username,
        first_seen: first_seen.and_utc(),
    }
}
