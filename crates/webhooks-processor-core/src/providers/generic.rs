//! Generic HTTP provider.
//!
//! Posts every event as JSON to `url`. The optional `headers` field holds
//! extra request headers, one `Name:value` pair per line; lines without a
//! colon or with an empty name are ignored.

use super::{required_url, HttpSender, Provider, ProviderConfig, ProviderError};
use crate::event::SecurityEvent;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GenericProvider {
    sender: HttpSender,
}

impl GenericProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            sender: HttpSender::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for GenericProvider {
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError> {
        required_url(config).map(|_| ())
    }

    async fn process(
        &self,
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        let url = required_url(config)?;
        let headers = parse_headers(config.get("headers").map(String::as_str).unwrap_or(""));
        let payload = json!({
            "event": event,
            "labels": labels,
        });

        self.sender
            .send(|client| {
                let mut request = client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .json(&payload);
                for (name, value) in &headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                request
            })
            .await
    }

    fn config(&self) -> &ProviderConfig {
        self.sender.config()
    }
}

/// Parse `Name:value` lines into header pairs
pub fn parse_headers(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let Some((name, value)) = line.split_once(':') else {
                debug!(line = line, "Ignoring malformed header line");
                return None;
            };
            let name = name.trim();
            if name.is_empty() || reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                debug!(line = line, "Ignoring malformed header line");
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
#[path = "generic_tests.rs"]
mod tests;
