//! # Event Providers
//!
//! Delivery of security events to external consumers.
//!
//! A [`Provider`] validates the resolved configuration of a webhook and
//! delivers single events. It also declares the rate-limit policy its
//! workers run under. Providers are collected once at startup into an
//! immutable [`ProviderRegistry`] keyed by consumer.

use crate::event::SecurityEvent;
use crate::webhook::WebhookConsumer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub mod generic;
pub mod jira;
pub mod slack;

pub use generic::GenericProvider;
pub use jira::JiraProvider;
pub use slack::SlackProvider;

// ============================================================================
// Provider Interface
// ============================================================================

/// Delivery capability for one consumer family
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check a resolved configuration before a worker is started
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError>;

    /// Deliver one event
    async fn process(
        &self,
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError>;

    /// Rate-limit and delivery policy
    fn config(&self) -> &ProviderConfig;
}

/// Rate-limit and retry policy of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Length of the rolling rate-limit window
    pub rate_limiter_duration_seconds: u64,

    /// Events admitted per window
    pub rate_limiter_count: usize,

    /// Timeout of a single HTTP request
    pub request_timeout_ms: u64,

    /// Pause between delivery attempts
    pub retry_duration_ms: u64,

    /// Delivery attempts per event
    pub retry_times: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            rate_limiter_duration_seconds: 3600,
            rate_limiter_count: 100,
            request_timeout_ms: 5_000,
            retry_duration_ms: 2_000,
            retry_times: 5,
        }
    }
}

impl ProviderConfig {
    pub fn rate_limiter_duration(&self) -> Duration {
        Duration::from_secs(self.rate_limiter_duration_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_duration(&self) -> Duration {
        Duration::from_millis(self.retry_duration_ms)
    }
}

/// Per-consumer provider policies, as loaded from service configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub slack: ProviderConfig,
    pub jira: ProviderConfig,
    pub generic: ProviderConfig,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while validating configuration or delivering events
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{field} field is not present in webhook configuration")]
    MissingField { field: String },

    #[error("invalid {field} in webhook configuration: {message}")]
    InvalidField { field: String, message: String },

    #[error("unexpected response [{status}]:{body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("request failed: {message}")]
    Request { message: String },

    #[error("HTTP client could not be created: {message}")]
    Client { message: String },
}

impl ProviderError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::UnexpectedResponse { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Fetch a required, non-empty configuration value
pub(crate) fn required<'a>(
    config: &'a HashMap<String, String>,
    field: &str,
) -> Result<&'a str, ProviderError> {
    config
        .get(field)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingField {
            field: field.to_string(),
        })
}

/// Fetch the `url` field and check that it is an HTTP(S) URL
pub(crate) fn required_url<'a>(
    config: &'a HashMap<String, String>,
) -> Result<&'a str, ProviderError> {
    let url = required(config, "url")?;
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url)
    } else {
        Err(ProviderError::InvalidField {
            field: "url".to_string(),
            message: format!("'{}' is not an http(s) URL", url),
        })
    }
}

// ============================================================================
// HTTP Delivery
// ============================================================================

/// HTTP client shared by the consumer implementations, retrying failed
/// deliveries according to the provider policy
#[derive(Debug, Clone)]
pub(crate) struct HttpSender {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl HttpSender {
    pub(crate) fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ProviderError::Client {
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    pub(crate) fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Send the request built by `build` until it succeeds or the attempts
    /// are exhausted; the last error is returned
    pub(crate) async fn send<F>(&self, build: F) -> Result<(), ProviderError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let attempts = self.config.retry_times.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match build(&self.client).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(attempt = attempt, "Event delivered");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    ProviderError::UnexpectedResponse { status, body }
                }
                Err(e) => ProviderError::Request {
                    message: e.to_string(),
                },
            };

            if attempt >= attempts {
                return Err(error);
            }

            warn!(
                attempt = attempt,
                max_attempts = attempts,
                error = %error,
                "Event delivery failed, retrying"
            );
            tokio::time::sleep(self.config.retry_duration()).await;
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable table of providers keyed by consumer
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<WebhookConsumer, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the Slack, Jira and Generic providers
    pub fn with_defaults(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        Ok(Self::new()
            .with(
                WebhookConsumer::Slack,
                Arc::new(SlackProvider::new(config.slack.clone())?),
            )
            .with(
                WebhookConsumer::Jira,
                Arc::new(JiraProvider::new(config.jira.clone())?),
            )
            .with(
                WebhookConsumer::Generic,
                Arc::new(GenericProvider::new(config.generic.clone())?),
            ))
    }

    /// Add a provider, replacing any previous one for the consumer
    pub fn with(mut self, consumer: WebhookConsumer, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(consumer, provider);
        self
    }

    /// Look up the provider of a consumer
    pub fn get(&self, consumer: &WebhookConsumer) -> Option<Arc<dyn Provider>> {
        self.providers.get(consumer).cloned()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut consumers: Vec<_> = self.providers.keys().map(|c| c.as_str()).collect();
        consumers.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("consumers", &consumers)
            .finish()
    }
}

/// Short human readable event summary used by chat and ticket providers
pub(crate) fn summary(event: &SecurityEvent) -> String {
    if event.description.is_empty() {
        format!("Security event of type {}", event.event_type)
    } else {
        event.description.clone()
    }
}

/// Labels rendered as sorted `key: value` lines
pub(crate) fn render_labels(labels: &HashMap<String, String>) -> Vec<String> {
    let mut lines: Vec<String> = labels
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{}: {}", key, value)
            }
        })
        .collect();
    lines.sort();
    lines
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
