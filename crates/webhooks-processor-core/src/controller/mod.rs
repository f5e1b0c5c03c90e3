//! # Webhook Lifecycle Controller
//!
//! Keeps exactly one worker per webhook configuration in sync with its spec.
//!
//! ```text
//! WebhookWatcherUpdater ──WebhookEvent──▶ WebhookController ──▶ ControllerState ──▶ workers
//!          ▲                                 │        ▲                               │
//!          └──────── status updates ─────────┘        └────────── status ─────────────┘
//! ```
//!
//! - [`WebhookWatcherUpdater`] lists and watches the store, synthesizes
//!   deletes missed while no watch was open, and persists status updates.
//! - [`WebhookController`] is the single consumer of configuration and
//!   dependency events; [`ControllerState`] is only ever touched from its
//!   loop.
//! - Workers poll the event fetcher on a fixed interval and report health
//!   through a bounded channel drained by the controller loop.

use crate::clock::{Clock, SystemClock};
use crate::fetcher::EventFetcher;
use crate::providers::ProviderRegistry;
use crate::query::{EventSchema, SecurityEventSchema};
use crate::store::{DependencyEvent, DependencyStore, WebhookStore};
use crate::webhook::SecurityEventWebhook;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod state;
pub mod watcher;
mod worker;

#[cfg(test)]
mod testing;

pub use state::ControllerState;
pub use watcher::WebhookWatcherUpdater;

/// Namespace used for ConfigMap/Secret references that do not name one
pub const DEFAULT_DEPENDENCY_NAMESPACE: &str = "security-webhooks";

// ============================================================================
// Configuration
// ============================================================================

/// Tunables of the controller, as loaded from service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Interval between two fetch cycles of a worker
    pub fetching_interval_seconds: u64,

    /// Namespace for config var references without one
    pub dependency_namespace: String,

    /// Capacity of every internal channel
    pub channel_capacity: usize,

    /// Pause before relisting after a failed list or watch
    pub relist_backoff_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            fetching_interval_seconds: 10,
            dependency_namespace: DEFAULT_DEPENDENCY_NAMESPACE.to_string(),
            channel_capacity: 100,
            relist_backoff_ms: 1_000,
        }
    }
}

/// Collaborators and tunables the controller runs with
#[derive(Clone)]
pub struct ControllerConfig {
    pub fetcher: Arc<dyn EventFetcher>,
    pub dependencies: Arc<dyn DependencyStore>,
    pub providers: ProviderRegistry,
    pub schema: Arc<dyn EventSchema>,
    pub clock: Arc<dyn Clock>,
    pub fetching_interval: Duration,
    pub dependency_namespace: String,
    pub channel_capacity: usize,
    pub relist_backoff: Duration,
}

impl ControllerConfig {
    /// Create configuration with default schema, clock and tunables
    pub fn new(
        fetcher: Arc<dyn EventFetcher>,
        dependencies: Arc<dyn DependencyStore>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            fetcher,
            dependencies,
            providers,
            schema: Arc::new(SecurityEventSchema),
            clock: Arc::new(SystemClock),
            fetching_interval: Duration::from_secs(10),
            dependency_namespace: DEFAULT_DEPENDENCY_NAMESPACE.to_string(),
            channel_capacity: 100,
            relist_backoff: Duration::from_secs(1),
        }
    }

    /// Apply tunables from service configuration
    pub fn with_settings(mut self, settings: &ControllerSettings) -> Self {
        self.fetching_interval = Duration::from_secs(settings.fetching_interval_seconds);
        self.dependency_namespace = settings.dependency_namespace.clone();
        self.channel_capacity = settings.channel_capacity.max(1);
        self.relist_backoff = Duration::from_millis(settings.relist_backoff_ms);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fetching_interval(mut self, interval: Duration) -> Self {
        self.fetching_interval = interval;
        self
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Configuration change forwarded from the store boundary
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Added(SecurityEventWebhook),
    Modified(SecurityEventWebhook),
    Deleted(SecurityEventWebhook),
}

/// Central dispatch loop routing configuration, dependency and status
/// traffic
pub struct WebhookController {
    state: ControllerState,
    status_rx: mpsc::Receiver<SecurityEventWebhook>,
}

impl WebhookController {
    /// Create the controller; workers are cancelled through children of
    /// `cancel`
    pub fn new(config: ControllerConfig, cancel: CancellationToken) -> Self {
        let (status_tx, status_rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            state: ControllerState::new(config, status_tx, cancel),
            status_rx,
        }
    }

    /// Run until `cancel` fires, then stop every worker and return
    pub async fn run(
        self,
        mut webhook_events: mpsc::Receiver<WebhookEvent>,
        mut dependency_events: mpsc::Receiver<DependencyEvent>,
        updates: mpsc::Sender<SecurityEventWebhook>,
        cancel: CancellationToken,
    ) {
        let Self {
            mut state,
            mut status_rx,
        } = self;

        info!("Webhook controller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(event) = webhook_events.recv() => match event {
                    WebhookEvent::Added(webhook) | WebhookEvent::Modified(webhook) => {
                        state.incoming_webhook_update(webhook).await;
                    }
                    WebhookEvent::Deleted(webhook) => state.stop(webhook.uid()),
                },
                Some(event) = dependency_events.recv() => state.check_dependencies(&event).await,
                Some(webhook) = status_rx.recv() => forward(&updates, webhook).await,
            }

            for webhook in state.take_outbox() {
                forward(&updates, webhook).await;
            }
        }

        info!("Webhook controller stopping");
        state.stop_all().await;
    }
}

async fn forward(updates: &mpsc::Sender<SecurityEventWebhook>, webhook: SecurityEventWebhook) {
    debug!(webhook = %webhook.name(), uid = %webhook.uid(), "Forwarding status update");
    if updates.send(webhook).await.is_err() {
        warn!("Status updater has stopped, dropping status update");
    }
}

// ============================================================================
// Wiring
// ============================================================================

/// Running controller and its store boundary
pub struct ControllerHandle {
    dependency_events: mpsc::Sender<DependencyEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Sender for ConfigMap/Secret change notifications
    pub fn dependency_events(&self) -> mpsc::Sender<DependencyEvent> {
        self.dependency_events.clone()
    }

    /// Wait for every task to finish after cancellation
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Controller task failed");
            }
        }
    }
}

/// Start the watcher, the status updater and the controller loop
pub fn start(
    store: Arc<dyn WebhookStore>,
    config: ControllerConfig,
    cancel: CancellationToken,
) -> ControllerHandle {
    let capacity = config.channel_capacity.max(1);
    let (webhook_tx, webhook_rx) = mpsc::channel(capacity);
    let (dependency_tx, dependency_rx) = mpsc::channel(capacity);
    let (updates_tx, updates_rx) = mpsc::channel(capacity);

    let watcher = Arc::new(WebhookWatcherUpdater::new(store, config.relist_backoff));
    let controller = WebhookController::new(config, cancel.clone());

    let watch_task = {
        let watcher = watcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { watcher.watch(webhook_tx, cancel).await })
    };
    let persist_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { watcher.persist(updates_rx, cancel).await })
    };
    let controller_task =
        tokio::spawn(controller.run(webhook_rx, dependency_rx, updates_tx, cancel));

    ControllerHandle {
        dependency_events: dependency_tx,
        tasks: vec![watch_task, persist_task, controller_task],
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
