//! Common test utilities for the webhooks processor integration tests
//!
//! This module provides:
//! - A recording consumer standing in for Slack/Jira/Generic
//! - A harness running the full controller over in-memory stores
//! - Builders for webhook configurations and events

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use webhooks_processor_core::adapters::{
    InMemoryDependencyStore, InMemoryEventSource, InMemoryWebhookStore,
};
use webhooks_processor_core::controller::{self, ControllerConfig, ControllerHandle};
use webhooks_processor_core::providers::{
    Provider, ProviderConfig, ProviderError, ProviderRegistry,
};
use webhooks_processor_core::webhook::{
    ConfigVar, SecurityEventWebhook, WebhookConsumer, WebhookSpec, WebhookState,
};
use webhooks_processor_core::{Clock, SecurityEvent, TokioClock, WebhookUid};

// ============================================================================
// Recording Consumer
// ============================================================================

/// Delivered event together with the labels it was sent with
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub event: SecurityEvent,
    pub labels: HashMap<String, String>,
    pub config: HashMap<String, String>,
}

/// Consumer recording every delivery; requires a `url` entry
#[derive(Default)]
pub struct RecordingConsumer {
    config: ProviderConfig,
    deliveries: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
}

#[allow(dead_code)]
impl RecordingConsumer {
    pub fn with_config(config: ProviderConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn delivered_ids(&self) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .map(|d| d.event.id)
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for RecordingConsumer {
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError> {
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
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::UnexpectedResponse {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.deliveries.lock().unwrap().push(Delivery {
            event: event.clone(),
            labels: labels.clone(),
            config: config.clone(),
        });
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Controller running over in-memory stores
#[allow(dead_code)]
pub struct TestProcessor {
    pub store: InMemoryWebhookStore,
    pub source: InMemoryEventSource,
    pub dependencies: InMemoryDependencyStore,
    pub consumer: Arc<RecordingConsumer>,
    pub clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    handle: ControllerHandle,
}

#[allow(dead_code)]
impl TestProcessor {
    /// Start with a recording Generic consumer and a 10s fetching interval
    ///
    /// Must be called from a test running with paused time; wall time starts
    /// at [`t0`].
    pub fn start() -> Self {
        Self::start_with(RecordingConsumer::default(), |registry| registry)
    }

    pub fn start_with(
        consumer: RecordingConsumer,
        extend: impl FnOnce(ProviderRegistry) -> ProviderRegistry,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::anchored_at(t0()));
        Self::start_with_clock(consumer, extend, clock, Duration::from_secs(10))
    }

    pub fn start_with_clock(
        consumer: RecordingConsumer,
        extend: impl FnOnce(ProviderRegistry) -> ProviderRegistry,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let store = InMemoryWebhookStore::new();
        let source = InMemoryEventSource::new();
        let dependencies = InMemoryDependencyStore::new();
        let consumer = Arc::new(consumer);
        let registry =
            extend(ProviderRegistry::new().with(WebhookConsumer::Generic, consumer.clone()));

        let config = ControllerConfig::new(
            Arc::new(source.clone()),
            Arc::new(dependencies.clone()),
            registry,
        )
        .with_clock(clock.clone())
        .with_fetching_interval(interval);
        let cancel = CancellationToken::new();
        let handle = controller::start(Arc::new(store.clone()), config, cancel.clone());

        Self {
            store,
            source,
            dependencies,
            consumer,
            clock,
            cancel,
            handle,
        }
    }

    pub fn dependency_events(
        &self,
    ) -> tokio::sync::mpsc::Sender<webhooks_processor_core::store::DependencyEvent> {
        self.handle.dependency_events()
    }

    /// Current stored state of a webhook
    pub fn stored(&self, uid: &WebhookUid) -> SecurityEventWebhook {
        self.store.get(uid).expect("webhook is stored")
    }

    /// Reason of the stored `Healthy` condition
    pub fn reason(&self, uid: &WebhookUid) -> Option<String> {
        self.store
            .get(uid)
            .and_then(|w| w.health_condition().map(|c| c.reason.clone()))
    }

    /// Cancel everything and wait until every worker has exited
    pub async fn shutdown(self) {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle.join())
            .await
            .expect("controller stopped in time");
    }
}

// ============================================================================
// Builders and helpers
// ============================================================================

#[allow(dead_code)]
/// Start of the simulated timeline
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn at(offset_seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(offset_seconds)
}

#[allow(dead_code)]
/// Generic webhook with a literal URL
pub fn webhook(name: &str, state: WebhookState, query: &str) -> SecurityEventWebhook {
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

#[allow(dead_code)]
pub fn event(id: &str, event_type: &str, time: DateTime<Utc>) -> SecurityEvent {
    SecurityEvent::new(id, event_type, time)
}

#[allow(dead_code)]
/// Poll `condition` every 100ms for up to 60s
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting until {}", what);
}
