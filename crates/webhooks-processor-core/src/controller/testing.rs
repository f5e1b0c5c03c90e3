//! Test doubles shared by the controller tests.

use crate::clock::Clock;
use crate::event::SecurityEvent;
use crate::providers::{Provider, ProviderConfig, ProviderError};
use crate::webhook::{ConfigVar, SecurityEventWebhook, WebhookConsumer, WebhookSpec, WebhookState};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Start of every test timeline
pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub(crate) fn seconds(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

/// Clock that never moves
#[derive(Debug)]
pub(crate) struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub(crate) fn webhook(name: &str, state: WebhookState, query: &str) -> SecurityEventWebhook {
    SecurityEventWebhook::new(
        name,
        WebhookSpec {
            consumer: WebhookConsumer::Generic,
            state,
            query: query.to_string(),
            config: vec![ConfigVar::literal("url", "https://example.com/hook")],
        },
    )
}

/// Provider recording every delivery; requires a `url` entry
#[derive(Debug, Default)]
pub(crate) struct RecordingProvider {
    config: ProviderConfig,
    delivered: Mutex<Vec<SecurityEvent>>,
    validated: Mutex<Vec<HashMap<String, String>>>,
    failing: AtomicBool,
}

impl RecordingProvider {
    pub(crate) fn with_config(config: ProviderConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub(crate) fn delivered(&self) -> Vec<SecurityEvent> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn validated(&self) -> Vec<HashMap<String, String>> {
        self.validated.lock().unwrap().clone()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError> {
        self.validated.lock().unwrap().push(config.clone());
        if config.contains_key("url") {
            Ok(())
        } else {
            Err(ProviderError::MissingField {
                field: "url".to_string(),
            })
        }
    }

    async fn process(
        &self,
        _config: &HashMap<String, String>,
        _labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::UnexpectedResponse {
                status: 500,
                body: "boom".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
