//! Configuration loading and typed config structures for the Wello controller.
//!
//! The canonical configuration lives in `wello-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//!
//! Every field has a default except the decision thresholds: the
//! `controller` section is optional, and when it is absent the thresholds
//! must arrive on the bus `configuration` channel before any decision is
//! taken.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use wello_db::SqliteConfig;
use wello_events::BusConfig;

use crate::capacity::TankCapacity;
use crate::decision::{DecisionError, Thresholds};
use crate::retry::RetryPolicy;

/// Environment variable overriding [`StoreConfig::database_url`].
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Environment variable overriding [`LoggingConfig::format`].
pub const LOG_FORMAT_ENV: &str = "WELLO_LOG_FORMAT";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level controller configuration.
///
/// Mirrors the structure of `wello-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WelloConfig {
    /// Decision thresholds, if supplied at startup.
    #[serde(default)]
    pub controller: Option<ControllerConfig>,

    /// Tank geometry facts used by the manual override.
    #[serde(default)]
    pub tank: TankConfig,

    /// Hardware polling and retry settings.
    #[serde(default)]
    pub io: IoConfig,

    /// Event bus delivery settings.
    #[serde(default)]
    pub bus: BusSettings,

    /// Time-series store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl WelloConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// A missing file yields the defaults. Environment variables override
    /// YAML values:
    /// - `DATABASE_URL` overrides `store.database_url`
    /// - `WELLO_LOG_FORMAT` overrides `logging.format`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override values from an arbitrary variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_ENV) {
            self.store.database_url = Some(url);
        }
        if let Some(raw) = lookup(LOG_FORMAT_ENV) {
            match LogFormat::parse(&raw) {
                Some(format) => self.logging.format = format,
                None => tracing::warn!(value = raw, "Ignoring unknown {LOG_FORMAT_ENV}"),
            }
        }
    }

    /// Check every range constraint.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(controller) = &self.controller {
            controller.thresholds()?;
        }
        self.tank.capacity()?;
        if self.io.poll_interval_ms == 0 {
            return Err(invalid("io.poll_interval_ms", "must be greater than zero"));
        }
        if self.io.retry.max_attempts == 0 {
            return Err(invalid("io.retry.max_attempts", "must be at least 1"));
        }
        if self.store.max_connections == 0 {
            return Err(invalid("store.max_connections", "must be at least 1"));
        }
        if self.store.connect_timeout_ms == 0 {
            return Err(invalid("store.connect_timeout_ms", "must be greater than zero"));
        }
        if self.bus.subscriber_capacity == 0 {
            return Err(invalid("bus.subscriber_capacity", "must be greater than zero"));
        }
        if self.shutdown.timeout_ms == 0 {
            return Err(invalid("shutdown.timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ControllerConfig {
    /// Minimum time an output stays in a state before the engine acts on
    /// it, in milliseconds.
    pub min_running_delay_ms: u64,

    /// Inflow at or below which the well is considered dry (mm3/s).
    pub min_flow: f64,
}

impl ControllerConfig {
    /// Validated thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a threshold is out of range.
    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::new(Duration::from_millis(self.min_running_delay_ms), self.min_flow).map_err(
            |e| match e {
                DecisionError::InvalidThreshold { name, reason } => ConfigError::Invalid {
                    field: name,
                    reason,
                },
                other => invalid("controller", other.to_string()),
            },
        )
    }
}

/// Tank configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TankConfig {
    /// Usable volume of the tank (mm3).
    #[serde(default = "default_tank_capacity")]
    pub capacity_mm3: f64,

    /// Head room kept below capacity before a manual pump start is
    /// refused (mm3).
    #[serde(default = "default_tank_margin")]
    pub margin_mm3: f64,
}

impl TankConfig {
    /// Validated capacity model.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if capacity or margin is out of
    /// range.
    pub fn capacity(&self) -> Result<TankCapacity, ConfigError> {
        if !self.capacity_mm3.is_finite() || self.capacity_mm3 <= 0.0 {
            return Err(invalid("tank.capacity_mm3", "must be a positive number"));
        }
        if !self.margin_mm3.is_finite() || self.margin_mm3 < 0.0 {
            return Err(invalid("tank.margin_mm3", "must be a non-negative number"));
        }
        if self.margin_mm3 >= self.capacity_mm3 {
            return Err(invalid("tank.margin_mm3", "must be smaller than the capacity"));
        }
        Ok(TankCapacity::new(self.capacity_mm3, self.margin_mm3))
    }
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            capacity_mm3: default_tank_capacity(),
            margin_mm3: default_tank_margin(),
        }
    }
}

/// Hardware I/O loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct IoConfig {
    /// Time between two sensor polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry policy for every driver call.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl IoConfig {
    /// Poll interval as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// Driver retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Attempts per driver call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// The policy described by this section.
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BusSettings {
    /// Queue capacity of each subscriber.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Longest wait on a full subscriber queue, in milliseconds.
    #[serde(default = "default_handoff_timeout_ms")]
    pub handoff_timeout_ms: u64,
}

impl BusSettings {
    /// The bus delivery parameters described by this section.
    pub const fn bus_config(&self) -> BusConfig {
        BusConfig {
            subscriber_capacity: self.subscriber_capacity,
            handoff_timeout: Duration::from_millis(self.handoff_timeout_ms),
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            handoff_timeout_ms: default_handoff_timeout_ms(),
        }
    }
}

/// Time-series store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// `SQLite` URL of the journal. `None` keeps the store in memory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Maximum number of pooled connections. In-memory databases always
    /// use one.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Longest wait for a pooled connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle time after which a pooled connection is closed, in
    /// milliseconds.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl StoreConfig {
    /// Journal settings, or `None` when the store is memory-only.
    pub fn sqlite(&self) -> Option<SqliteConfig> {
        self.database_url.as_deref().map(|url| {
            SqliteConfig::new(url)
                .with_max_connections(self.max_connections)
                .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
                .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms))
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse `pretty` or `json`, ignoring case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShutdownConfig {
    /// Longest time each loop gets to finish after the stop signal, in
    /// milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub timeout_ms: u64,
}

impl ShutdownConfig {
    /// Timeout as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

const fn default_tank_capacity() -> f64 {
    // 1 m3
    1_000_000_000.0
}

const fn default_tank_margin() -> f64 {
    // 5 litres
    5_000_000.0
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay_ms() -> u64 {
    50
}

const fn default_max_delay_ms() -> u64 {
    2000
}

const fn default_subscriber_capacity() -> usize {
    64
}

const fn default_handoff_timeout_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_shutdown_timeout_ms() -> u64 {
    5000
}

const fn default_max_connections() -> u32 {
    4
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_idle_timeout_ms() -> u64 {
    300_000
}
