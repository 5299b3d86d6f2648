//! Service configuration for the cardio risk service.
//!
//! Values resolve in three layers, later layers winning:
//!
//! 1. Built-in defaults ([`ServiceConfig::default`])
//! 2. An optional JSON file named by `CARDIO_CONFIG`
//! 3. Individual environment variables (`CARDIO_*`, `DATABASE_URL`)
//!
//! # Example
//!
//! ```rust
//! use cardio_config::{PersistencePolicy, ServiceConfig};
//!
//! let config = ServiceConfig::from_json(r#"{
//!     "model_path": "models/cardio_model.json",
//!     "scheduler": { "poll_interval_secs": 30 },
//!     "persistence_policy": "warn"
//! }"#).unwrap();
//!
//! assert_eq!(config.scheduler.poll_interval_secs, 30);
//! assert_eq!(config.scheduler.lookback_hours, 24);
//! assert_eq!(config.persistence_policy, PersistencePolicy::Warn);
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_PATH_ENV: &str = "CARDIO_CONFIG";

/// Errors that can occur when loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON configuration.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A setting has an unusable value.
    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
}

impl ConfigError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Creates an invalid-value error.
    pub fn invalid(key: impl Into<String>, value: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// What the orchestrator does when a prediction cannot be written.
///
/// | Policy | Behavior |
/// |--------|----------|
/// | `Propagate` | The call fails; nothing unrecorded is reported as a success |
/// | `Warn` | The prediction is returned together with a persistence warning |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    #[default]
    Propagate,
    Warn,
}

impl FromStr for PersistencePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "propagate" => Ok(Self::Propagate),
            "warn" => Ok(Self::Warn),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PersistencePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Propagate => "propagate",
            Self::Warn => "warn",
        };
        write!(f, "{}", s)
    }
}

/// Periodic batch prediction settings.
///
/// Poll interval and lookback window are independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub lookback_hours: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 60,
            lookback_hours: 24,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Chat-completion backend for advisory text. Disabled when `model` is unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    pub model: Option<String>,
    pub api_base: Option<String>,
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub model_path: String,
    pub scheduler: SchedulerConfig,
    pub persistence_policy: PersistencePolicy,
    /// Reject observations whose systolic pressure does not exceed diastolic.
    pub enforce_pressure_order: bool,
    /// Insert demo observations into an empty database at startup.
    pub seed_demo_data: bool,
    pub advisory: AdvisoryConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
            database_path: "data/cardio_predictions.db".into(),
            model_path: "models/cardio_model.json".into(),
            scheduler: SchedulerConfig::default(),
            persistence_policy: PersistencePolicy::default(),
            enforce_pressure_order: false,
            seed_demo_data: false,
            advisory: AdvisoryConfig::default(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, value, "expected a non-negative integer"))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ServiceConfig {
    /// Loads configuration from a JSON file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    /// Parses configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolves defaults, the optional config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                info!("Loading config from {}", path);
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides settings from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CARDIO_BIND_ADDR").and_then(non_empty) {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("DATABASE_URL").and_then(non_empty) {
            self.database_path = v;
        }
        if let Some(v) = lookup("CARDIO_MODEL_PATH").and_then(non_empty) {
            self.model_path = v;
        }
        if let Some(v) = lookup("CARDIO_SCHEDULER_ENABLED") {
            self.scheduler.enabled = parse_bool("CARDIO_SCHEDULER_ENABLED", &v)?;
        }
        if let Some(v) = lookup("CARDIO_POLL_INTERVAL_SECS") {
            self.scheduler.poll_interval_secs = parse_u64("CARDIO_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("CARDIO_LOOKBACK_HOURS") {
            self.scheduler.lookback_hours = parse_u64("CARDIO_LOOKBACK_HOURS", &v)?;
        }
        if let Some(v) = lookup("CARDIO_PERSISTENCE_POLICY") {
            self.persistence_policy = v.trim().parse().map_err(|_| {
                ConfigError::invalid("CARDIO_PERSISTENCE_POLICY", &v, "expected 'propagate' or 'warn'")
            })?;
        }
        if let Some(v) = lookup("CARDIO_ENFORCE_PRESSURE_ORDER") {
            self.enforce_pressure_order = parse_bool("CARDIO_ENFORCE_PRESSURE_ORDER", &v)?;
        }
        if let Some(v) = lookup("CARDIO_SEED_DEMO_DATA") {
            self.seed_demo_data = parse_bool("CARDIO_SEED_DEMO_DATA", &v)?;
        }
        if let Some(v) = lookup("CARDIO_ADVISORY_MODEL") {
            self.advisory.model = non_empty(v);
        }
        if let Some(v) = lookup("CARDIO_ADVISORY_API_BASE") {
            self.advisory.api_base = non_empty(v);
        }
        Ok(())
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("scheduler.poll_interval_secs", 0, "must be positive"));
        }
        if self.scheduler.lookback_hours == 0 {
            return Err(ConfigError::invalid("scheduler.lookback_hours", 0, "must be positive"));
        }
        if self.model_path.trim().is_empty() {
            return Err(ConfigError::invalid("model_path", "", "must not be empty"));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::invalid("database_path", "", "must not be empty"));
        }
        Ok(())
    }
}
