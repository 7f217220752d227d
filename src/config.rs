//! Configuration system for the Argus licensing runtime.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `ARGUS_API_BASE` - base URL of the licensing service
//! - `ARGUS_API_KEY` - bearer token sent on every request
//! - `ARGUS_PRODUCT_SLUG` - product identifier used in the wire paths
//! - `ARGUS_STORAGE_PREFIX` - key prefix used in the cache store
//! - `ARGUS_AUTO_VALIDATE_INTERVAL_SECS` - periodic validation interval (0 disables)
//! - `ARGUS_HEARTBEAT_INTERVAL_SECS` - periodic heartbeat interval (0 disables)
//! - `ARGUS_OFFLINE_FALLBACK_MODE` - `disabled` | `network_only` | `always`
//! - `ARGUS_MAX_OFFLINE_DAYS` - grace period length in days
//! - `ARGUS_MAX_CLOCK_SKEW_SECS` - tolerated clock skew for tamper detection
//! - `ARGUS_MAX_RETRIES` - API Adapter retry budget
//! - `ARGUS_RETRY_DELAY_MS` - API Adapter base retry delay
//! - `ARGUS_TELEMETRY_ENABLED` - attach the telemetry envelope to requests
//! - `ARGUS_DEVICE_ID` - override the default host-derived device id

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{ConfigurationError, Error};

/// Global configuration singleton, populated on first [`get_config`] call.
static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Offline Fallback Policy enumeration (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineFallbackMode {
    /// Network failures propagate; no offline fallback is attempted.
    Disabled,
    /// Fall back to offline verification only for `NetworkError`/`ServerError`.
    NetworkOnly,
    /// Fall back on any validation error.
    Always,
}

impl Default for OfflineFallbackMode {
    fn default() -> Self {
        OfflineFallbackMode::NetworkOnly
    }
}

/// Root configuration for a Session Core instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base URL of the licensing service, e.g. `https://api.example.com`.
    pub api_base: String,
    /// Bearer token sent as `Authorization: Bearer <api_key>`.
    pub api_key: String,
    /// Product slug used in wire paths (`/products/{slug}/...`).
    pub product_slug: String,
    /// Key prefix used in the Cache Store (`<prefix>license`, etc).
    pub storage_prefix: String,
    /// Seconds between automatic `validate()` calls; 0 disables the cycle.
    pub auto_validate_interval_secs: u64,
    /// Seconds between automatic heartbeats; 0 disables the cycle.
    pub heartbeat_interval_secs: u64,
    /// Governs whether/when a failed online validation falls back to offline verification.
    pub offline_fallback_mode: OfflineFallbackMode,
    /// Days an offline token with no explicit `exp` remains trusted (0 disables the grace cap).
    pub max_offline_days: u32,
    /// Seconds of tolerated clock skew before a clock-tamper verdict is raised.
    pub max_clock_skew_secs: i64,
    /// Number of retries the API Adapter attempts for retryable statuses.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; actual delay is `retry_delay * 2^attempt`.
    pub retry_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Whether to attach the telemetry envelope to outgoing requests.
    pub telemetry_enabled: bool,
    /// Overrides the host-derived default device identifier when set.
    pub device_id_override: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            product_slug: String::new(),
            storage_prefix: "argus:".to_string(),
            auto_validate_interval_secs: 3600,
            heartbeat_interval_secs: 300,
            offline_fallback_mode: OfflineFallbackMode::default(),
            max_offline_days: 7,
            max_clock_skew_secs: 300,
            max_retries: 2,
            retry_delay_ms: 500,
            request_timeout_secs: 30,
            telemetry_enabled: false,
            device_id_override: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from file and environment, falling back to defaults.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    fn load() -> Result<Self, Error> {
        let map_err = |e: config::ConfigError| {
            Error::Configuration(ConfigurationError::InvalidConfiguration(e.to_string()))
        };

        let builder = Config::builder()
            .set_default("api_base", "")
            .map_err(map_err)?
            .set_default("api_key", "")
            .map_err(map_err)?
            .set_default("product_slug", "")
            .map_err(map_err)?
            .set_default("storage_prefix", "argus:")
            .map_err(map_err)?
            .set_default("auto_validate_interval_secs", 3600i64)
            .map_err(map_err)?
            .set_default("heartbeat_interval_secs", 300i64)
            .map_err(map_err)?
            .set_default("offline_fallback_mode", "network_only")
            .map_err(map_err)?
            .set_default("max_offline_days", 7i64)
            .map_err(map_err)?
            .set_default("max_clock_skew_secs", 300i64)
            .map_err(map_err)?
            .set_default("max_retries", 2i64)
            .map_err(map_err)?
            .set_default("retry_delay_ms", 500i64)
            .map_err(map_err)?
            .set_default("request_timeout_secs", 30i64)
            .map_err(map_err)?
            .set_default("telemetry_enabled", false)
            .map_err(map_err)?
            .add_source(config::File::with_name("config").required(false))
            .set_override_option("api_base", env::var("ARGUS_API_BASE").ok())
            .map_err(map_err)?
            .set_override_option("api_key", env::var("ARGUS_API_KEY").ok())
            .map_err(map_err)?
            .set_override_option("product_slug", env::var("ARGUS_PRODUCT_SLUG").ok())
            .map_err(map_err)?
            .set_override_option("storage_prefix", env::var("ARGUS_STORAGE_PREFIX").ok())
            .map_err(map_err)?
            .set_override_option(
                "auto_validate_interval_secs",
                env::var("ARGUS_AUTO_VALIDATE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "heartbeat_interval_secs",
                env::var("ARGUS_HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "offline_fallback_mode",
                env::var("ARGUS_OFFLINE_FALLBACK_MODE").ok(),
            )
            .map_err(map_err)?
            .set_override_option(
                "max_offline_days",
                env::var("ARGUS_MAX_OFFLINE_DAYS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "max_clock_skew_secs",
                env::var("ARGUS_MAX_CLOCK_SKEW_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "max_retries",
                env::var("ARGUS_MAX_RETRIES")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "retry_delay_ms",
                env::var("ARGUS_RETRY_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(map_err)?
            .set_override_option(
                "telemetry_enabled",
                env::var("ARGUS_TELEMETRY_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(map_err)?
            .set_override_option("device_id_override", env::var("ARGUS_DEVICE_ID").ok())
            .map_err(map_err)?;

        let settings = builder.build().map_err(map_err)?;
        settings.try_deserialize().map_err(map_err)
    }

    /// Validate the configuration, returning the first violated invariant.
    pub fn validate(&self) -> Result<(), Error> {
        if self.api_base.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration(
                "api_base must not be empty".to_string(),
            )
            .into());
        }
        if self.api_key.is_empty() {
            return Err(ConfigurationError::MissingApiKey.into());
        }
        if self.product_slug.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration(
                "product_slug must not be empty".to_string(),
            )
            .into());
        }
        if self.storage_prefix.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration(
                "storage_prefix must not be empty".to_string(),
            )
            .into());
        }
        if self.max_retries > 10 {
            return Err(ConfigurationError::InvalidConfiguration(
                "max_retries must be 10 or fewer".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

/// Get the global configuration, loading and validating it on first access.
pub fn get_config() -> Result<&'static RuntimeConfig, Error> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = RuntimeConfig::load()?;
    config.validate()?;

    let _ = CONFIG.set(config);
    Ok(CONFIG.get().expect("config was just set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RuntimeConfig {
        RuntimeConfig {
            api_base: "https://ex/api".to_string(),
            api_key: "key".to_string(),
            product_slug: "p".to_string(),
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_missing_api_key() {
        let mut config = valid_config();
        config.api_key = String::new();
        let err = config.validate().unwrap_err();
        assert_eq!(err.reason_code(), "missing_api_key");
    }

    #[test]
    fn rejects_empty_api_base() {
        let mut config = valid_config();
        config.api_base = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_product_slug() {
        let mut config = valid_config();
        config.product_slug = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_excessive_retries() {
        let mut config = valid_config();
        config.max_retries = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_offline_fallback_mode_is_network_only() {
        assert_eq!(
            RuntimeConfig::default().offline_fallback_mode,
            OfflineFallbackMode::NetworkOnly
        );
    }
}
