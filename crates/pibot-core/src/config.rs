//! PiBot configuration system.
//!
//! Values come from `~/.pibot/config.toml` (every field optional), then
//! `BOT_TOKEN` / `ALLOWED_USER_IDS` from the environment or a `.env` file
//! override the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PiBotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiBotConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl PiBotConfig {
    /// Load config from the default path, falling back to defaults, then
    /// apply `.env` and environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_env(&Self::default_path())
    }

    /// Load config from `path` (defaults if missing) and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(".env not loaded: {e}");
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PiBotError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PiBotError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Apply `BOT_TOKEN` and `ALLOWED_USER_IDS` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_string();
        }
        if let Some(ids) = lookup("ALLOWED_USER_IDS").filter(|s| !s.trim().is_empty()) {
            self.telegram.allowed_user_ids = parse_user_ids(&ids)?;
        }
        Ok(())
    }

    /// Check that the bot can actually run with this config.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.is_empty() {
            return Err(PiBotError::Config("BOT_TOKEN is required".into()));
        }
        if self.telegram.allowed_user_ids.is_empty() {
            return Err(PiBotError::Config("ALLOWED_USER_IDS is required".into()));
        }
        if self.scheduler.send_timeout_secs == 0 {
            return Err(PiBotError::Config(
                "scheduler.send_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the PiBot home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pibot")
    }
}

/// Parse a comma-separated list of Telegram user ids.
pub fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|e| PiBotError::Config(format!("invalid user ID {s}: {e}")))
        })
        .collect()
}

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,
    /// Seconds to wait between `getUpdates` calls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn default_poll_interval() -> u64 { 1 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_user_ids: Vec::new(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// SQLite database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.pibot/pibot.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Reminder scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on a single reminder delivery while the scheduler lock is held.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_send_timeout() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { send_timeout_secs: default_send_timeout() }
    }
}

/// Lifecycle announcements sent to chats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// "online" / "shutting down" messages to every allowed user.
    #[serde(default = "bool_true")]
    pub announce_startup: bool,
    /// One notice per recovered reminder after a restart.
    #[serde(default = "bool_true")]
    pub announce_recovery: bool,
}

fn bool_true() -> bool { true }

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            announce_startup: true,
            announce_recovery: true,
        }
    }
}
