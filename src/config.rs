use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::models::DEFAULT_RETENTION_DAYS;
use crate::repository::crash_reports::DEFAULT_MAX_REPORTS;
use crate::sync::RetryPolicy;

/// Application configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedded database settings
    pub storage: StorageConfig,
    /// Log level, file and format
    pub logging: LoggingConfig,
    /// Push retry and backend settings
    pub sync: SyncConfig,
    /// Retention defaults and hashing
    pub privacy: PrivacyConfig,
    /// Crash report buffer
    pub crash: CrashConfig,
    /// Caller-side limits
    pub timeouts: TimeoutConfig,
}

/// Where and how the store persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the sled database
    pub path: String,
    /// Flush to disk after every mutation
    pub flush_on_write: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    pub level: String,
    /// Directory-qualified file for the daily JSON log
    pub file_path: Option<String>,
    /// Console format
    pub format: String, // "json" or "text"
}

/// Sync retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Push attempts per key, first try included
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Latency of the simulated backend
    pub simulated_latency_ms: u64,
}

/// Privacy defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Retention window used until the user picks one
    pub default_retention_days: u32,
    /// Salt for hashed identifiers in crash reports
    pub hash_salt: String,
}

/// Crash report settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashConfig {
    /// Reports kept before the oldest are dropped
    pub max_reports: usize,
    /// Version stamped on every report
    pub app_version: String,
}

/// Timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Limit for timed loads
    pub load_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                path: "data/companion.sled".to_string(),
                flush_on_write: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            sync: SyncConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                simulated_latency_ms: 50,
            },
            privacy: PrivacyConfig {
                default_retention_days: DEFAULT_RETENTION_DAYS,
                hash_salt: "companion-store".to_string(),
            },
            crash: CrashConfig {
                max_reports: DEFAULT_MAX_REPORTS,
                app_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            timeouts: TimeoutConfig { load_timeout_ms: 5_000 },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&Self::default())?)
            // Add config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("companion").required(false))
            // COMPANION__SYNC__MAX_ATTEMPTS=5 overrides sync.max_attempts
            .add_source(Self::environment())
            .build()?;

        Self::finish(config)
    }

    /// Load defaults, then `path`, then the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?;

        Self::finish(config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("COMPANION")
            .separator("__")
            .try_parsing(true)
    }

    fn finish(config: Config) -> Result<Self> {
        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.path.trim().is_empty() {
            return Err(StoreError::Config("storage.path must not be empty".into()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(StoreError::Config(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                self.logging.level
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(StoreError::Config(format!(
                "Invalid log format: {}. Must be one of: {valid_formats:?}",
                self.logging.format
            )));
        }

        if self.sync.max_attempts == 0 {
            return Err(StoreError::Config("sync.max_attempts must be greater than 0".into()));
        }
        if self.sync.base_delay_ms > self.sync.max_delay_ms {
            return Err(StoreError::Config(
                "sync.base_delay_ms must not exceed sync.max_delay_ms".into(),
            ));
        }

        if !(1..=3650).contains(&self.privacy.default_retention_days) {
            return Err(StoreError::Config(
                "privacy.default_retention_days must be between 1 and 3650".into(),
            ));
        }
        if self.privacy.hash_salt.is_empty() {
            return Err(StoreError::Config("privacy.hash_salt must not be empty".into()));
        }

        if self.crash.max_reports == 0 {
            return Err(StoreError::Config("crash.max_reports must be greater than 0".into()));
        }

        if self.timeouts.load_timeout_ms == 0 {
            return Err(StoreError::Config("timeouts.load_timeout_ms must be greater than 0".into()));
        }

        Ok(())
    }

    /// Backoff for pushes to the backend
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_attempts,
            base_delay: Duration::from_millis(self.sync.base_delay_ms),
            max_delay: Duration::from_millis(self.sync.max_delay_ms),
        }
    }

    /// Latency of the simulated backend
    #[must_use]
    pub const fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.sync.simulated_latency_ms)
    }

    /// Caller-side limit for loads
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.load_timeout_ms)
    }

    /// Effective configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| StoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.path, "data/companion.sled");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.privacy.default_retention_days, 365);
        assert_eq!(config.crash.max_reports, 50);
    }

    #[test]
    fn test_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = AppConfig::default();
        config.sync.max_attempts = 0;
        assert!(matches!(config.validate(), Err(StoreError::Config(_))));

        let mut config = AppConfig::default();
        config.sync.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = AppConfig::default().retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_yaml_rendering() {
        let yaml = AppConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("storage:"));
        assert!(yaml.contains("max_reports: 50"));
    }
}
