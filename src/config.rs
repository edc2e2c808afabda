//! Configuration loader and validator for the link-fetching bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub tracker: Tracker,
    #[serde(default)]
    pub downloader: Downloader,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub download_dir: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default)]
    pub admin_users: Vec<i64>,
}

/// User tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tracker {
    /// Minimum time between two successful description updates.
    pub description_update_interval_secs: u64,
    /// How often the background task asks the throttler for an update.
    pub check_interval_secs: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            description_update_interval_secs: 3600,
            check_interval_secs: 300,
        }
    }
}

/// yt-dlp invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Downloader {
    pub ytdlp_bin: String,
    pub socket_timeout_secs: u64,
    pub retries: u32,
    pub timeout_secs: u64,
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            ytdlp_bin: "yt-dlp".into(),
            socket_timeout_secs: 30,
            retries: 10,
            timeout_secs: 600,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and `app.download_dir`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        for dir in [&self.app.data_dir, &self.app.download_dir] {
            if !dir.trim().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// SQLite URL for the user registry, honouring `DATABASE_URL`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/bot_users.db", self.app.data_dir))
    }

    pub fn description_update_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.description_update_interval_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.check_interval_secs)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.telegram.admin_users.contains(&user_id)
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env_overrides(&mut cfg, std::env::var("BOT_TOKEN").ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// `BOT_TOKEN` wins over the file so the token can stay out of version control.
fn apply_env_overrides(cfg: &mut Config, bot_token: Option<String>) {
    if let Some(token) = bot_token.filter(|t| !t.trim().is_empty()) {
        cfg.telegram.bot_token = token;
    }
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.download_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.download_dir must be non-empty"));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    if cfg.tracker.description_update_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "tracker.description_update_interval_secs must be > 0",
        ));
    }
    if cfg.tracker.check_interval_secs == 0 {
        return Err(ConfigError::Invalid("tracker.check_interval_secs must be > 0"));
    }

    if cfg.downloader.ytdlp_bin.trim().is_empty() {
        return Err(ConfigError::Invalid("downloader.ytdlp_bin must be non-empty"));
    }
    if cfg.downloader.timeout_secs == 0 {
        return Err(ConfigError::Invalid("downloader.timeout_secs must be > 0"));
    }
    // socket_timeout_secs = 0 lets yt-dlp use its own default

    Ok(())
}

/// Returns the example YAML shipped in the README.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  download_dir: "./downloads"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admin_users:
    - 123456789

tracker:
  description_update_interval_secs: 3600
  check_interval_secs: 300

downloader:
  ytdlp_bin: "yt-dlp"
  socket_timeout_secs: 30
  retries: 10
  timeout_secs: 600
"#
}
