//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/locrelay/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/locrelay/` (~/.config/locrelay/)
//! - State/Logs: `$XDG_STATE_HOME/locrelay/` (~/.local/state/locrelay/)
//!
//! Nothing is persisted besides logs; the delivery queue lives in memory only.

use crate::error::{Error, Result};
use crate::types::{ExtraParams, SessionConfig};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default tracking session (optional, CLI flags override it)
    #[serde(default)]
    pub session: SessionSettings,

    /// Replay location source
    #[serde(default)]
    pub source: SourceConfig,

    /// Reachability probing
    #[serde(default)]
    pub connectivity: ConnectivityConfig,

    /// Delivery client and queue
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Default session settings
///
/// Mirrors the arguments of `start_tracking`. Values here are only defaults;
/// validation happens when a session starts.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SessionSettings {
    /// Tracking endpoint (e.g., `https://api.example.com/track`)
    pub base_url: Option<String>,

    /// Authorization header value, sent verbatim
    pub header: Option<String>,

    /// Extra scalar params merged into every payload
    #[serde(default)]
    pub params: ExtraParams,
}

impl SessionSettings {
    /// Check if both required fields are present
    pub fn is_ready(&self) -> bool {
        self.base_url.is_some() && self.header.is_some()
    }

    /// Build a session config, letting explicit values override the file.
    ///
    /// Missing fields become empty strings so validation reports them.
    pub fn resolve(
        &self,
        base_url: Option<String>,
        header: Option<String>,
        params: ExtraParams,
    ) -> SessionConfig {
        let mut merged = self.params.clone();
        for (key, value) in params.iter() {
            merged.insert(key.clone(), value.clone());
        }

        SessionConfig::new(
            base_url.or_else(|| self.base_url.clone()).unwrap_or_default(),
            header.or_else(|| self.header.clone()).unwrap_or_default(),
        )
        .with_extra_params(merged)
    }
}

/// Replay source configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Milliseconds between emitted fixes
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Fixes closer than this to the previous one are suppressed (meters)
    #[serde(default = "default_min_displacement_m")]
    pub min_displacement_m: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            min_displacement_m: default_min_displacement_m(),
        }
    }
}

impl SourceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_min_displacement_m() -> f64 {
    3.0
}

/// Connectivity probe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectivityConfig {
    /// Seconds between reachability probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// TCP connect timeout for a probe in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Reject zero intervals; a zero timeout makes every probe fail.
    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_secs == 0 {
            return Err(Error::Config(
                "connectivity.probe_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(Error::Config(
                "connectivity.probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_probe_interval() -> u64 {
    5
}

fn default_probe_timeout() -> u64 {
    2000
}

/// Delivery configuration
///
/// Both limits are unset by default: requests use the transport's own
/// timeout behaviour and the retry queue is unbounded.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeliveryConfig {
    /// HTTP request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Maximum queued events; the oldest is evicted when full
    pub max_queued: Option<usize>,
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == Some(0) {
            return Err(Error::Config(
                "delivery.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_queued == Some(0) {
            return Err(Error::Config(
                "delivery.max_queued must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.connectivity.validate()?;
        config.delivery.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/locrelay/config.toml` (~/.config/locrelay/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("locrelay").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/locrelay/` (~/.local/state/locrelay/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("locrelay")
    }

    /// Returns today's log file path
    ///
    /// Logs rotate daily (UTC), so the file name carries the date:
    /// `$XDG_STATE_HOME/locrelay/locrelay.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::log_path_on(chrono::Utc::now().date_naive())
    }

    /// Returns the log file path for a given day
    pub fn log_path_on(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(crate::logging::log_file_name(date))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
