//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     REMARKET_API_URL=https://api.example.com/v1/                       │
//! │     REMARKET_SYNC_MODE=manual                                          │
//! │     REMARKET_SYNC_INTERVAL_SECS=1800                                   │
//! │     REMARKET_DB_PATH=/data/remarket.db                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/remarket/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.remarket.remarket/sync.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     SyncMode::Auto, 15 minute period                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Credentials never live in this file; see [`crate::auth`].
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [api]
//! base_url = "https://api.remarket.example/v1/"
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//!
//! [sync]
//! mode = "auto"  # auto | manual | offline
//! max_push_attempts = 0  # 0 = retry without limit
//! push_interval_ms = 0
//!
//! [schedule]
//! initial_sync = true
//! periodic_interval_secs = 900
//! require_unmetered = true
//! require_battery_not_low = true
//!
//! [database]
//! path = "/var/lib/remarket/remarket.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Sync Mode
// =============================================================================

/// When the scheduler is allowed to run sync on its own.
///
/// ```text
/// AUTO     one-shot at start + periodic + on demand
/// MANUAL   on demand only
/// OFFLINE  no network calls; local writes still queue as PENDING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Auto,
    Manual,
    Offline,
}

impl SyncMode {
    /// Returns true if the scheduler fires without being asked.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, SyncMode::Auto)
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Auto => write!(f, "auto"),
            SyncMode::Manual => write!(f, "manual"),
            SyncMode::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "scheduled" => Ok(SyncMode::Auto),
            "manual" | "on_demand" => Ok(SyncMode::Manual),
            "offline" | "disabled" => Ok(SyncMode::Offline),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown sync mode: '{}'. Valid options: auto, manual, offline",
                other
            ))),
        }
    }
}

// =============================================================================
// API Settings
// =============================================================================

/// Remote product API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL; endpoint paths are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// TCP/TLS connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub mode: SyncMode,

    /// Failed pushes after which a retryable ERROR record is left alone.
    /// 0 = no limit.
    #[serde(default)]
    pub max_push_attempts: i64,

    /// Pause between two record pushes (milliseconds). 0 = none.
    #[serde(default)]
    pub push_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::default(),
            max_push_attempts: 0,
            push_interval_ms: 0,
        }
    }
}

// =============================================================================
// Schedule Settings
// =============================================================================

/// Scheduler timing and run constraints.
///
/// ```text
/// one-shot   needs any connectivity
/// periodic   needs unmetered network + battery not low (each toggleable)
/// retry      exponential: initial_backoff_ms × 2ⁿ, capped at max_backoff_secs
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Run once as soon as connectivity is present after start.
    #[serde(default = "default_true")]
    pub initial_sync: bool,

    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,

    #[serde(default = "default_true")]
    pub require_unmetered: bool,

    #[serde(default = "default_true")]
    pub require_battery_not_low: bool,

    /// How often unmet constraints are re-checked (seconds).
    #[serde(default = "default_constraint_poll")]
    pub constraint_poll_secs: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Retries of one run before giving up until the next period.
    /// Set to 0 for infinite retries.
    #[serde(default)]
    pub max_retries: u32,
}

fn default_true() -> bool {
    true
}
fn default_periodic_interval() -> u64 {
    15 * 60
}
fn default_constraint_poll() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    30_000
}
fn default_max_backoff() -> u64 {
    5 * 60 * 60
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            initial_sync: true,
            periodic_interval_secs: default_periodic_interval(),
            require_unmetered: true,
            require_battery_not_low: true,
            constraint_poll_secs: default_constraint_poll(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            max_retries: 0,
        }
    }
}

impl ScheduleSettings {
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn constraint_poll(&self) -> Duration {
        Duration::from_secs(self.constraint_poll_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `remarket.db` in the platform data dir.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());

        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = url::Url::parse(&self.api.base_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "API URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "API URL cannot take a path: {}",
                self.api.base_url
            )));
        }

        if self.api.connect_timeout_secs == 0 || self.api.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "API timeouts must be greater than 0".into(),
            ));
        }

        if self.sync.max_push_attempts < 0 {
            return Err(SyncError::InvalidConfig(
                "max_push_attempts must not be negative".into(),
            ));
        }

        let schedule = &self.schedule;
        if schedule.periodic_interval_secs == 0 || schedule.constraint_poll_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "schedule intervals must be greater than 0".into(),
            ));
        }
        if schedule.initial_backoff_ms == 0
            || schedule.initial_backoff() > schedule.max_backoff()
        {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be positive and not exceed max_backoff_secs".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides from a variable lookup (the process environment in
    /// production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REMARKET_API_URL") {
            debug!(url = %url, "Overriding API URL from environment");
            self.api.base_url = url;
        }

        if let Some(mode) = lookup("REMARKET_SYNC_MODE") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding sync mode from environment");
                    self.sync.mode = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown sync mode in environment"),
            }
        }

        if let Some(interval) = lookup("REMARKET_SYNC_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) => {
                    debug!(secs, "Overriding sync interval from environment");
                    self.schedule.periodic_interval_secs = secs;
                }
                Err(_) => warn!(interval = %interval, "Invalid sync interval in environment"),
            }
        }

        if let Some(path) = lookup("REMARKET_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "remarket", "remarket")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    /// Database file: the configured path or `remarket.db` in the platform
    /// data dir.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "remarket", "remarket")
                .map(|dirs| dirs.data_dir().join("remarket.db"))
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the sync mode.
    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn push_interval(&self) -> Option<Duration> {
        (self.sync.push_interval_ms > 0).then(|| Duration::from_millis(self.sync.push_interval_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Auto);
        assert_eq!("MANUAL".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("primary".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.sync.mode, SyncMode::Auto);
        assert_eq!(config.schedule.periodic_interval(), Duration::from_secs(900));
        assert_eq!(config.schedule.initial_backoff(), Duration::from_secs(30));
        assert_eq!(config.schedule.max_backoff(), Duration::from_secs(18_000));
        assert_eq!(config.push_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.api.base_url = "ftp://files.example.com".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.api.base_url = "not a url".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.api.base_url = "https://api.example.com/v1/".into();
        config.sync.max_push_attempts = -1;
        assert!(config.validate().is_err());

        config.sync.max_push_attempts = 0;
        assert!(config.validate().is_ok());

        config.sync.max_push_attempts = 3;
        config.schedule.initial_backoff_ms = 10 * 60 * 60 * 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REMARKET_API_URL", "https://api.example.com/"),
            ("REMARKET_SYNC_MODE", "manual"),
            ("REMARKET_SYNC_INTERVAL_SECS", "1800"),
            ("REMARKET_DB_PATH", "/tmp/rm.db"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.api.base_url, "https://api.example.com/");
        assert_eq!(config.mode(), SyncMode::Manual);
        assert_eq!(config.schedule.periodic_interval_secs, 1800);
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/rm.db")));
    }

    #[test]
    fn test_bad_mode_override_is_ignored() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|key| (key == "REMARKET_SYNC_MODE").then(|| "sideways".to_string()));
        assert_eq!(config.mode(), SyncMode::Auto);
    }

    #[test]
    fn test_bad_interval_override_keeps_default() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|key| {
            (key == "REMARKET_SYNC_INTERVAL_SECS").then(|| "15m".to_string())
        });
        assert_eq!(config.schedule.periodic_interval_secs, 900);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.api.base_url = "https://api.example.com/v2/".into();
        config.sync.push_interval_ms = 250;
        config.schedule.require_unmetered = false;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[api]"));
        assert!(contents.contains("[schedule]"));

        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.api.base_url, "https://api.example.com/v2/");
        assert_eq!(loaded.push_interval(), Some(Duration::from_millis(250)));
        assert!(!loaded.schedule.require_unmetered);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SyncConfig = toml::from_str("[sync]\nmode = \"offline\"\n").unwrap();
        assert_eq!(config.mode(), SyncMode::Offline);
        assert_eq!(config.schedule.periodic_interval_secs, 900);
        assert_eq!(config.sync.max_push_attempts, 0);
    }
}
