//! Runtime configuration from defaults or environment variables.

use crate::domain::builder::BuildOptions;
use crate::domain::value_objects::DEFAULT_DUST_SATOSHIS;
use crate::errors::JigError;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default freshness window for side-reads during import: four hours.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(4 * 60 * 60);

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is out of range or malformed.
    #[error("invalid config {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl From<ConfigError> for JigError {
    fn from(err: ConfigError) -> Self {
        JigError::Validation(err.to_string())
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Application id written into every payload
    pub app_id: String,

    /// Network identifier (main, test, mock)
    pub network: String,

    /// How long before a transaction a side-read may have been spent and
    /// still count as fresh
    pub freshness_window: Duration,

    /// Minimum satoshis on every owner output
    pub dust_satoshis: u64,

    /// Start publishing as soon as a transaction is ready
    pub auto_publish: bool,

    /// Write the debug marker chunk
    pub debug: bool,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            network: "mock".to_string(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            dust_satoshis: DEFAULT_DUST_SATOSHIS,
            auto_publish: true,
            debug: false,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `JIG_APP_ID`: Application id (default: empty)
    /// - `JIG_NETWORK`: Network name (default: mock)
    /// - `JIG_FRESHNESS_SECS`: Freshness window in seconds (default: 14400)
    /// - `JIG_DUST`: Dust limit in satoshis (default: 546)
    /// - `JIG_AUTO_PUBLISH`: Publish without waiting for `sync` (default: true)
    /// - `JIG_DEBUG`: Write the debug marker (default: false)
    /// - `JIG_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `JIG_JSON_LOGS`: Enable JSON logs (default: false)
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_id: env::var("JIG_APP_ID").unwrap_or(defaults.app_id),

            network: env::var("JIG_NETWORK").unwrap_or(defaults.network),

            freshness_window: env::var("JIG_FRESHNESS_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(defaults.freshness_window, Duration::from_secs),

            dust_satoshis: env::var("JIG_DUST")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dust_satoshis),

            auto_publish: env::var("JIG_AUTO_PUBLISH")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(defaults.auto_publish),

            debug: env::var("JIG_DEBUG")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.debug),

            log_level: env::var("JIG_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or(defaults.log_level),

            json_logs: env::var("JIG_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.json_logs),
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.is_empty() {
            return Err(ConfigError::Invalid {
                field: "network",
                reason: "must not be empty".to_string(),
            });
        }
        if self.app_id.len() > 255 {
            return Err(ConfigError::Invalid {
                field: "app_id",
                reason: "longer than 255 bytes".to_string(),
            });
        }
        if self.dust_satoshis == 0 {
            return Err(ConfigError::Invalid {
                field: "dust_satoshis",
                reason: "must be positive".to_string(),
            });
        }
        if self.freshness_window.is_zero() {
            return Err(ConfigError::Invalid {
                field: "freshness_window",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Freshness window in ledger milliseconds.
    #[must_use]
    pub fn freshness_millis(&self) -> u64 {
        u64::try_from(self.freshness_window.as_millis()).unwrap_or(u64::MAX)
    }

    /// Payload and output settings for the transaction builder.
    #[must_use]
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            app_id: self.app_id.clone(),
            debug: self.debug,
            dust: self.dust_satoshis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.freshness_window, Duration::from_secs(14_400));
        assert_eq!(config.dust_satoshis, 546);
        assert!(config.auto_publish);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_dust() {
        let config = RuntimeConfig {
            dust_satoshis: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "dust_satoshis",
                ..
            })
        ));
    }

    #[test]
    fn test_build_options() {
        let config = RuntimeConfig {
            app_id: "demo".to_string(),
            debug: true,
            ..RuntimeConfig::default()
        };
        let options = config.build_options();
        assert_eq!(options.app_id, "demo");
        assert!(options.debug);
        assert_eq!(options.dust, 546);
        assert_eq!(config.freshness_millis(), 14_400_000);
    }
}
