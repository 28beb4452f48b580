//! Feedhook configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FeedhookError, Result};

/// Polling interval bounds in minutes, inclusive.
pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 1440;

/// Environment variable that overrides `database_path`.
pub const DATABASE_ENV: &str = "FEEDHOOK_DB";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedhookConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Used when a workspace has no interval stored.
    #[serde(default = "default_interval_minutes")]
    pub default_interval_minutes: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Feed documents larger than this are rejected unparsed.
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: usize,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_database_path() -> String { "~/.feedhook/feedhook.db".into() }
fn default_interval_minutes() -> u32 { 10 }
fn default_fetch_timeout_secs() -> u64 { 30 }
fn default_max_feed_bytes() -> usize { 5 * 1024 * 1024 }
fn default_delivery_timeout_secs() -> u64 { 10 }
fn default_user_agent() -> String {
    format!("feedhook/{} (+https://github.com/feedhook/feedhook)", env!("CARGO_PKG_VERSION"))
}

impl Default for FeedhookConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_interval_minutes: default_interval_minutes(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_feed_bytes: default_max_feed_bytes(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl FeedhookConfig {
    /// Load config from the default path (~/.feedhook/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FeedhookError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| FeedhookError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FeedhookError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the feedhook home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".feedhook")
    }

    /// Database location with `FEEDHOOK_DB` applied and `~` expanded.
    pub fn resolved_database_path(&self) -> PathBuf {
        let raw = std::env::var(DATABASE_ENV).unwrap_or_else(|_| self.database_path.clone());
        PathBuf::from(shellexpand::tilde(&raw).to_string())
    }

    /// The fallback interval, forced into the allowed range.
    pub fn effective_default_interval(&self) -> u32 {
        clamp_interval(self.default_interval_minutes)
    }
}

/// Force a polling interval into `[MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES]`.
pub fn clamp_interval(minutes: u32) -> u32 {
    minutes.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
}

/// Reject intervals outside the allowed range. Settings writers call this
/// before persisting so the scheduler only ever reads in-range values.
pub fn validate_interval(minutes: u32) -> Result<u32> {
    if (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(FeedhookError::Validation(format!(
            "check interval must be between {MIN_INTERVAL_MINUTES} and {MAX_INTERVAL_MINUTES} minutes, got {minutes}"
        )))
    }
}
