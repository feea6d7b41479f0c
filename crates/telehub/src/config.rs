//! Configuration management for telehub.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "telehub";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "telemetry.db";

/// Default `MongoDB` database name.
const DEFAULT_MONGODB_DB: &str = "telemetry";

/// Longest accepted retention age (100 years).
const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted anomaly detection window (10 years).
const MAX_ANOMALY_WINDOW_HOURS: u32 = 87_600;

/// Prefix for telehub-specific environment variables.
const ENV_PREFIX: &str = "TELEHUB_";

/// Plain environment variables set by the deployment, and the keys they map to.
const DEPLOYMENT_ENV: &[(&str, &str)] = &[
    ("API_PORT", "server.port"),
    ("API_URL", "dashboard.api_url"),
    ("DASHBOARD_PORT", "dashboard.port"),
    ("DATABASE_PATH", "storage.database_path"),
    ("MONGODB_URI", "storage.mongodb_uri"),
    ("MONGODB_DB", "storage.mongodb_db"),
    ("ENVIRONMENT", "environment"),
];

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Deployment environment variables (`API_PORT`, `API_URL`, `ENVIRONMENT`, ...)
/// 2. Environment variables prefixed with `TELEHUB_` (`__` separates sections)
/// 3. TOML config file at `~/.config/telehub/config.toml`
/// 4. Default values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment label, e.g. `development` or `production`.
    pub environment: String,
    /// API server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Analytics configuration.
    pub analytics: AnalyticsConfig,
    /// Dashboard configuration.
    pub dashboard: DashboardConfig,
}

/// API server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Number of HTTP worker threads. 0 uses one per CPU core.
    pub workers: usize,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the `SQLite` database file, used when no `MongoDB` URI is set.
    /// Defaults to `~/.local/share/telehub/telemetry.db`
    pub database_path: Option<PathBuf>,
    /// `MongoDB` connection string. When set, events are stored in `MongoDB`.
    pub mongodb_uri: Option<String>,
    /// `MongoDB` database name.
    pub mongodb_db: String,
    /// Maximum age of events to retain in days.
    /// Set to 0 for unlimited.
    pub max_age_days: u32,
    /// Prune interval in hours.
    pub prune_interval_hours: u32,
}

/// Analytics and anomaly detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Look-back window for anomaly detection, in hours.
    pub anomaly_window_hours: u32,
    /// Failure rate (0..1) above which an anomaly is raised.
    pub failure_rate_threshold: f64,
    /// Install events required in the window before raising an anomaly.
    pub min_install_count: u64,
    /// Successful installs slower than this count as long-running.
    pub long_running_threshold_secs: u64,
    /// Default number of sessions returned by the recent sessions endpoint.
    pub recent_limit: usize,
}

/// Dashboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Address to bind.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Base URL of the telemetry API.
    pub api_url: String,
    /// Number of recent sessions to show.
    pub recent_sessions: usize,
    /// Timeout for API requests in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            analytics: AnalyticsConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9999,
            workers: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            mongodb_uri: None,
            mongodb_db: DEFAULT_MONGODB_DB.to_string(),
            max_age_days: 0,
            prune_interval_hours: 24,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            anomaly_window_hours: 24,
            failure_rate_threshold: 0.3,
            min_install_count: 5,
            long_running_threshold_secs: 600,
            recent_limit: 10,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8501,
            api_url: "http://localhost:9999".to_string(),
            recent_sessions: 20,
            request_timeout_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        for &(var, key) in DEPLOYMENT_ENV {
            figment = figment.merge(Env::raw().only(&[var]).map(move |_| key.into()));
        }

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(Error::ConfigValidation {
                message: "server.port must be greater than 0".to_string(),
            });
        }

        if self.dashboard.port == 0 {
            return Err(Error::ConfigValidation {
                message: "dashboard.port must be greater than 0".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.analytics.failure_rate_threshold) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "analytics.failure_rate_threshold ({}) must be between 0 and 1",
                    self.analytics.failure_rate_threshold
                ),
            });
        }

        if !(1..=MAX_ANOMALY_WINDOW_HOURS).contains(&self.analytics.anomaly_window_hours) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "analytics.anomaly_window_hours ({}) must be between 1 and {MAX_ANOMALY_WINDOW_HOURS}",
                    self.analytics.anomaly_window_hours
                ),
            });
        }

        if self.storage.max_age_days > MAX_RETENTION_DAYS {
            return Err(Error::ConfigValidation {
                message: format!(
                    "storage.max_age_days ({}) must be at most {MAX_RETENTION_DAYS}",
                    self.storage.max_age_days
                ),
            });
        }

        if let Some(uri) = &self.storage.mongodb_uri {
            if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
                return Err(Error::ConfigValidation {
                    message: "storage.mongodb_uri must start with mongodb:// or mongodb+srv://"
                        .to_string(),
                });
            }
            if self.storage.mongodb_db.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "storage.mongodb_db must not be empty".to_string(),
                });
            }
        }

        if self.storage.max_age_days > 0 && self.storage.prune_interval_hours == 0 {
            return Err(Error::ConfigValidation {
                message: "storage.prune_interval_hours must be greater than 0 when pruning is enabled"
                    .to_string(),
            });
        }

        let api_url = self.dashboard.api_url.as_str();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(Error::ConfigValidation {
                message: format!("dashboard.api_url must be an http(s) URL: {api_url}"),
            });
        }

        Ok(())
    }

    /// Whether this is a development deployment (enables debug logging).
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the max age as a Duration.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        if self.storage.max_age_days == 0 {
            None
        } else {
            Some(Duration::from_secs(
                u64::from(self.storage.max_age_days) * 24 * 60 * 60,
            ))
        }
    }

    /// Get the prune interval as a Duration.
    #[must_use]
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.storage.prune_interval_hours) * 60 * 60)
    }

    /// Get the anomaly detection window as a Duration.
    #[must_use]
    pub fn anomaly_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.analytics.anomaly_window_hours) * 60 * 60)
    }

    /// Get the dashboard's API request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.dashboard.request_timeout_secs)
    }
}
