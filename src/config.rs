//! Configuration management for Dubwatch.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application name used for config directory.
const APP_NAME: &str = "Dubwatch";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Default store filename, placed next to the config file.
const STORE_FILENAME: &str = "store.json";

/// Placeholder value for unconfigured API tokens.
const TOKEN_PLACEHOLDER: &str = "YOUR_TOKEN_HERE";

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// List site (GraphQL) settings.
    pub anilist: AnilistConfig,

    /// Schedule site settings.
    pub animeschedule: AnimeScheduleConfig,

    /// Outbound request throttling.
    pub dispatcher: DispatcherConfig,

    /// Dub record freshness and front cache.
    pub cache: CacheConfig,

    /// List reconciliation.
    pub sync: SyncConfig,

    /// Daily re-check sweep.
    pub sweep: SweepConfig,

    /// Persistence.
    pub storage: StorageConfig,

    /// Notification delivery.
    pub notify: NotifyConfig,
}

/// GraphQL list API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnilistConfig {
    /// GraphQL endpoint.
    pub endpoint: String,
}

impl Default for AnilistConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://graphql.anilist.co".to_string(),
        }
    }
}

/// Schedule site configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeScheduleConfig {
    /// Base URL of the structured API.
    pub api_url: String,

    /// Base URL of the HTML site.
    pub site_url: String,

    /// Bearer token for the API (required).
    pub token: String,
}

impl Default for AnimeScheduleConfig {
    fn default() -> Self {
        Self {
            api_url: "https://animeschedule.net/api/v3".to_string(),
            site_url: "https://animeschedule.net".to_string(),
            token: TOKEN_PLACEHOLDER.to_string(),
        }
    }
}

impl AnimeScheduleConfig {
    /// Checks if the API token is configured (not placeholder).
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && self.token != TOKEN_PLACEHOLDER
    }
}

/// Request dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Requests allowed in flight per origin.
    pub per_origin_concurrency: usize,

    /// Retries after a 429 before giving up.
    pub max_retries: u32,

    /// Delay used when a 429 carries no usable header, and the floor for
    /// reset-timestamp delays.
    pub default_retry_after_ms: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            per_origin_concurrency: 2,
            max_retries: 3,
            default_retry_after_ms: 1000,
            request_timeout_secs: 30,
            user_agent: concat!("dubwatch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn default_retry_after(&self) -> Duration {
        Duration::from_millis(self.default_retry_after_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Dub record freshness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hours a resolved record stays fresh.
    pub freshness_hours: i64,

    /// Maximum entries in the in-process front cache.
    pub front_capacity: usize,

    /// Seconds an entry lives in the front cache.
    pub front_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_hours: 24,
            front_capacity: 1000,
            front_ttl_secs: 600,
        }
    }
}

/// List reconciliation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote lists whose entries are never tracked.
    pub excluded_lists: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            excluded_lists: vec!["Dropped".to_string()],
        }
    }
}

/// Daily sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Titles re-resolved at the same time.
    pub concurrency: usize,

    /// Upper bound for one title's resolution.
    pub title_timeout_secs: u64,

    /// Hour of day (UTC) the daemon runs the sweep.
    pub run_at_hour_utc: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            title_timeout_secs: 120,
            run_at_hour_utc: 0,
        }
    }
}

impl SweepConfig {
    pub fn title_timeout(&self) -> Duration {
        Duration::from_secs(self.title_timeout_secs)
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON store file. Defaults to `store.json` in the config directory.
    pub path: Option<PathBuf>,
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving `{ user_id, content }` posts. Log-only if unset.
    pub webhook_url: Option<String>,
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from `path`.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.animeschedule.is_configured() {
            return Err(ConfigError::MissingValue(
                "animeschedule.token (set your AnimeSchedule API token in config file)"
                    .to_string(),
            ));
        }

        let positive = [
            (
                "dispatcher.per_origin_concurrency",
                self.dispatcher.per_origin_concurrency as i64,
            ),
            ("cache.freshness_hours", self.cache.freshness_hours),
            ("cache.front_capacity", self.cache.front_capacity as i64),
            ("sweep.concurrency", self.sweep.concurrency as i64),
        ];
        for (key, value) in positive {
            if value <= 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }

        if self.sweep.run_at_hour_utc > 23 {
            return Err(ConfigError::InvalidValue {
                key: "sweep.run_at_hour_utc".to_string(),
                message: "must be between 0 and 23".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the effective store path, using config or default.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref path) = self.storage.path {
            Ok(path.clone())
        } else {
            Ok(Self::config_dir()?.join(STORE_FILENAME))
        }
    }
}
