//! # Event Fetching
//!
//! Retrieves the security events matching a query within a time window.
//!
//! Windows are half-open, `[from, to)`, so consecutive windows sharing a
//! boundary never return the same event twice.

use crate::event::SecurityEvent;
use crate::query::Query;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Source of security events
#[async_trait]
pub trait EventFetcher: Send + Sync {
    /// Fetch events matching `query` with `from <= time < to`
    async fn fetch(
        &self,
        query: &Query,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, FetchError>;
}

/// Errors raised while fetching events
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("event store request failed: {message}")]
    Request { message: String },

    #[error("event store returned [{status}]: {body}")]
    Status { status: u16, body: String },

    #[error("event store response could not be decoded: {message}")]
    Decode { message: String },

    #[error("event store request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl FetchError {
    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode { .. } => false,
        }
    }
}

// ============================================================================
// HTTP Event Fetcher
// ============================================================================

/// Connection settings of the HTTP event store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    /// Base URL, e.g. `http://event-store:8080`
    pub url: String,

    pub request_timeout_seconds: u64,

    /// Events requested per page
    pub page_size: usize,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            request_timeout_seconds: 30,
            page_size: 100,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    selector: &'a str,
    from: String,
    to: String,
    page: usize,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total_hits: usize,
    #[serde(default)]
    items: Vec<SecurityEvent>,
}

/// Fetches events from `POST {url}/events/search`, following pages until
/// the reported total has been read or a short page arrives
#[derive(Debug, Clone)]
pub struct HttpEventFetcher {
    client: reqwest::Client,
    endpoint: String,
    page_size: usize,
    timeout: Duration,
}

impl HttpEventFetcher {
    pub fn new(config: &EventStoreConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/events/search", config.url.trim_end_matches('/')),
            page_size: config.page_size.max(1),
            timeout,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::Request {
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl EventFetcher for HttpEventFetcher {
    async fn fetch(
        &self,
        query: &Query,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, FetchError> {
        let mut events = Vec::new();
        let mut page = 0;

        loop {
            let request = SearchRequest {
                selector: query.as_str(),
                from: from.to_rfc3339_opts(SecondsFormat::Secs, true),
                to: to.to_rfc3339_opts(SecondsFormat::Secs, true),
                page,
                page_size: self.page_size,
            };

            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(|e| self.map_send_error(e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: SearchResponse = response.json().await.map_err(|e| FetchError::Decode {
                message: e.to_string(),
            })?;

            let received = body.items.len();
            events.extend(body.items);

            debug!(
                page = page,
                received = received,
                total_hits = body.total_hits,
                "Fetched event page"
            );

            if received < self.page_size || events.len() >= body.total_hits {
                break;
            }
            page += 1;
        }

        Ok(events)
    }
}

#[cfg(test)]
#[path = "fetcher_tests.rs"]
mod tests;
