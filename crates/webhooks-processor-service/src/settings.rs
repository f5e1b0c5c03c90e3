//! Service configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webhooks_processor_core::adapters::FilesystemStoreConfig;
use webhooks_processor_core::controller::ControllerSettings;
use webhooks_processor_core::fetcher::EventStoreConfig;
use webhooks_processor_core::providers::{ProviderConfig, ProvidersConfig};

/// Top-level configuration of the service
///
/// Every section carries defaults, so an empty configuration is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Worker scheduling and internal channel settings
    pub controller: ControllerSettings,

    /// Event store connection
    pub event_store: EventStoreConfig,

    /// Per-consumer rate-limit and retry policies
    pub providers: ProvidersConfig,

    /// Location of webhook configurations and their ConfigMaps/Secrets
    pub store: FilesystemStoreConfig,

    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Invalid service configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: &str) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Check values serde cannot rule out
    pub fn validate(&self) -> Result<(), ConfigError> {
        let controller = &self.controller;
        if controller.fetching_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "controller.fetching_interval_seconds",
                "must be greater than zero",
            ));
        }
        if controller.channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "controller.channel_capacity",
                "must be greater than zero",
            ));
        }
        if controller.dependency_namespace.trim().is_empty() {
            return Err(ConfigError::invalid(
                "controller.dependency_namespace",
                "must not be empty",
            ));
        }

        let event_store = &self.event_store;
        if event_store.url.trim().is_empty() {
            return Err(ConfigError::invalid("event_store.url", "must not be empty"));
        }
        if event_store.page_size == 0 {
            return Err(ConfigError::invalid(
                "event_store.page_size",
                "must be greater than zero",
            ));
        }
        if event_store.request_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "event_store.request_timeout_seconds",
                "must be greater than zero",
            ));
        }

        validate_provider("providers.slack", &self.providers.slack)?;
        validate_provider("providers.jira", &self.providers.jira)?;
        validate_provider("providers.generic", &self.providers.generic)?;

        let store = &self.store;
        if store.webhooks_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("store.webhooks_dir", "must not be empty"));
        }
        if store.dependencies_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "store.dependencies_dir",
                "must not be empty",
            ));
        }
        if store.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "store.poll_interval_ms",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn validate_provider(section: &str, config: &ProviderConfig) -> Result<(), ConfigError> {
    if config.rate_limiter_count == 0 {
        return Err(ConfigError::invalid(
            &format!("{}.rate_limiter_count", section),
            "must be greater than zero",
        ));
    }
    if config.rate_limiter_duration_seconds == 0 {
        return Err(ConfigError::invalid(
            &format!("{}.rate_limiter_duration_seconds", section),
            "must be greater than zero",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
