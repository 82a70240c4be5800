//! Configuration structures.
//!
//! Configuration is loaded from JSON files and environment variables.

use serde::{Deserialize, Serialize};

use super::errors::{Error, Result};
use crate::event::EventOptions;

/// Env var overriding [`ObservabilityConfig::log_level`].
pub const ENV_LOG_LEVEL: &str = "LIFECYCLE_EVENT_LOG_LEVEL";
/// Env var overriding [`ObservabilityConfig::json_logs`].
pub const ENV_JSON_LOGS: &str = "LIFECYCLE_EVENT_JSON_LOGS";

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Options applied to events built with [`crate::LifecycleEvent::from_config`].
    #[serde(default)]
    pub defaults: EventOptions,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Load defaults, then apply overrides from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.observability.log_level = level;
        }
        if let Some(json) = lookup(ENV_JSON_LOGS) {
            self.observability.json_logs =
                json.eq_ignore_ascii_case("true") || json == "1" || json.eq_ignore_ascii_case("json");
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.observability.log_level.trim().is_empty() {
            return Err(Error::validation("observability.log_level cannot be empty"));
        }
        self.defaults.validate()
    }
}
