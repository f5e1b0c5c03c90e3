//! # Controller State
//!
//! Decides for every incoming configuration whether to start a worker,
//! route the update into the running one, or restart it.
//!
//! A worker is restarted if and only if the spec content hash changed or a
//! ConfigMap/Secret it was resolved from changed. Configurations that fail
//! validation get no worker; the echo of the failure status written back to
//! the store is swallowed once so it does not trigger another validation
//! round. A configuration rejected while resolving its ConfigMaps/Secrets is
//! validated again as soon as one of them changes.

use super::worker::{self, Dispatcher, WorkerContext};
use super::ControllerConfig;
use crate::config_resolver::{self, Dependencies};
use crate::query::Query;
use crate::store::DependencyEvent;
use crate::webhook::{HealthReason, SecurityEventWebhook, WebhookState, HEALTHY_MESSAGE};
use crate::WebhookUid;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Bookkeeping for one running worker
#[derive(Debug)]
struct WorkerRecord {
    /// `None` once a dependency changed, forcing a restart on the next touch
    spec_hash: Option<String>,
    cancel: CancellationToken,
    updates: mpsc::Sender<SecurityEventWebhook>,
    dependencies: Dependencies,
    generation: u64,
}

/// Bookkeeping for a configuration that failed validation
#[derive(Debug)]
struct Rejection {
    spec_hash: String,
    /// Cleared once the failure status has echoed back from the store
    swallow_echo: bool,
    /// Objects whose change may fix the configuration
    dependencies: Dependencies,
    /// Latest known copy, validated again when a dependency changes
    webhook: SecurityEventWebhook,
}

/// Lifecycle manager of all workers
///
/// Owned by the controller loop; none of its methods are called
/// concurrently.
pub struct ControllerState {
    config: ControllerConfig,
    workers: HashMap<WebhookUid, WorkerRecord>,
    rejections: HashMap<WebhookUid, Rejection>,
    status_tx: mpsc::Sender<SecurityEventWebhook>,
    outbox: Vec<SecurityEventWebhook>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    generation: u64,
}

impl ControllerState {
    /// Create empty state; workers report status on `status_tx`
    pub fn new(
        config: ControllerConfig,
        status_tx: mpsc::Sender<SecurityEventWebhook>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            workers: HashMap::new(),
            rejections: HashMap::new(),
            status_tx,
            outbox: Vec::new(),
            cancel,
            tracker: TaskTracker::new(),
            generation: 0,
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Handle an added or modified configuration
    pub async fn incoming_webhook_update(&mut self, webhook: SecurityEventWebhook) {
        let uid = webhook.uid().clone();
        let hash = webhook.spec.content_hash();

        if let Some(record) = self.workers.get(&uid) {
            if record.spec_hash.as_deref() == Some(hash.as_str()) {
                debug!(webhook = %webhook.name(), uid = %uid, "Spec unchanged, routing update to worker");
                if record.updates.send(webhook).await.is_err() {
                    warn!(uid = %uid, "Worker is no longer receiving updates");
                }
                return;
            }

            info!(webhook = %webhook.name(), uid = %uid, "Spec or dependencies changed, restarting worker");
            self.stop(&uid);
        }

        if let Some(rejection) = self.rejections.get_mut(&uid) {
            if rejection.swallow_echo && rejection.spec_hash == hash {
                debug!(webhook = %webhook.name(), uid = %uid, "Ignoring update of webhook that failed validation");
                rejection.swallow_echo = false;
                rejection.webhook = webhook;
                return;
            }
        }
        self.rejections.remove(&uid);

        self.start(webhook, hash).await;
    }

    /// Stop the worker of a configuration, if any
    pub fn stop(&mut self, uid: &WebhookUid) {
        self.rejections.remove(uid);
        if let Some(record) = self.workers.remove(uid) {
            info!(uid = %uid, generation = record.generation, "Stopping worker");
            record.cancel.cancel();
        }
    }

    /// Mark workers that depend on the changed object for restart and
    /// validate again the rejected configurations that reference it
    pub async fn check_dependencies(&mut self, event: &DependencyEvent) {
        for (uid, record) in self.workers.iter_mut() {
            if record.dependencies.is_affected_by(event) {
                info!(
                    uid = %uid,
                    kind = %event.kind,
                    namespace = %event.namespace,
                    name = %event.name,
                    "Dependency changed, worker restarts on next update"
                );
                record.spec_hash = None;
            }
        }

        let affected: Vec<WebhookUid> = self
            .rejections
            .iter()
            .filter(|(_, rejection)| rejection.dependencies.is_affected_by(event))
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in affected {
            let Some(rejection) = self.rejections.remove(&uid) else {
                continue;
            };
            info!(
                uid = %uid,
                kind = %event.kind,
                namespace = %event.namespace,
                name = %event.name,
                "Dependency of rejected webhook changed, validating again"
            );
            self.start(rejection.webhook, rejection.spec_hash).await;
        }
    }

    /// Cancel every worker and wait until all of them have exited
    pub async fn stop_all(&mut self) {
        info!(workers = self.workers.len(), "Stopping all workers");
        for (_, record) in self.workers.drain() {
            record.cancel.cancel();
        }
        self.rejections.clear();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All workers stopped");
    }

    /// Status updates produced by validation since the last call
    pub fn take_outbox(&mut self) -> Vec<SecurityEventWebhook> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn is_running(&self, uid: &WebhookUid) -> bool {
        self.workers.contains_key(uid)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Monotonic start counter of the current worker; changes on restart
    pub fn worker_generation(&self, uid: &WebhookUid) -> Option<u64> {
        self.workers.get(uid).map(|r| r.generation)
    }

    pub fn is_restart_prevented(&self, uid: &WebhookUid) -> bool {
        self.rejections.get(uid).is_some_and(|r| r.swallow_echo)
    }

    // ------------------------------------------------------------------------
    // Worker start
    // ------------------------------------------------------------------------

    async fn start(&mut self, mut webhook: SecurityEventWebhook, hash: String) {
        let spec = webhook.spec.clone();

        if spec.state == WebhookState::Disabled {
            self.reject(
                webhook,
                hash,
                Dependencies::default(),
                HealthReason::WebhookState,
                "the webhook has been disabled",
            );
            return;
        }

        let query = match Query::parse(&spec.query) {
            Ok(query) => query,
            Err(e) => {
                self.reject(
                    webhook,
                    hash,
                    Dependencies::default(),
                    HealthReason::QueryParsing,
                    e.to_string(),
                );
                return;
            }
        };

        if let Err(e) = query.validate(self.config.schema.as_ref()) {
            self.reject(
                webhook,
                hash,
                Dependencies::default(),
                HealthReason::QueryValidation,
                e.to_string(),
            );
            return;
        }

        let resolved = match config_resolver::resolve(
            &spec.config,
            self.config.dependencies.as_ref(),
            &self.config.dependency_namespace,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                let referenced = Dependencies::referenced_by(
                    &spec.config,
                    &self.config.dependency_namespace,
                );
                self.reject(
                    webhook,
                    hash,
                    referenced,
                    HealthReason::ConfigurationParsing,
                    e.to_string(),
                );
                return;
            }
        };

        let Some(provider) = self.config.providers.get(&spec.consumer) else {
            let message = format!("unknown consumer: {}", spec.consumer);
            self.reject(
                webhook,
                hash,
                Dependencies::default(),
                HealthReason::ConsumerDiscovery,
                message,
            );
            return;
        };

        if let Err(e) = provider.validate(&resolved.values) {
            self.reject(
                webhook,
                hash,
                resolved.dependencies,
                HealthReason::ConsumerConfigurationValidation,
                e.to_string(),
            );
            return;
        }

        let provider_config = provider.config().clone();
        let dispatcher = match spec.state {
            WebhookState::Debug => Dispatcher::Debug,
            _ => Dispatcher::Provider(provider),
        };

        webhook.set_health(
            true,
            HealthReason::WebhookValidation,
            HEALTHY_MESSAGE,
            self.config.clock.now(),
        );
        self.outbox.push(webhook.clone());

        self.generation += 1;
        let generation = self.generation;
        let uid = webhook.uid().clone();
        let cancel = self.cancel.child_token();
        let (updates_tx, updates_rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let context = WorkerContext {
            name: webhook.name().to_string(),
            uid: uid.clone(),
            test_mode: spec.state == WebhookState::Test,
            query: Arc::new(query),
            config: Arc::new(resolved.values),
            dispatcher,
            fetcher: self.config.fetcher.clone(),
            clock: self.config.clock.clone(),
            interval: self.config.fetching_interval,
            rate_limit: provider_config,
            status: self.status_tx.clone(),
        };

        info!(
            webhook = %webhook.name(),
            uid = %uid,
            consumer = %spec.consumer,
            state = %spec.state,
            generation = generation,
            "Starting worker"
        );

        self.tracker
            .spawn(worker::run(context, webhook, updates_rx, cancel.clone()));

        self.workers.insert(
            uid,
            WorkerRecord {
                spec_hash: Some(hash),
                cancel,
                updates: updates_tx,
                dependencies: resolved.dependencies,
                generation,
            },
        );
    }

    fn reject(
        &mut self,
        mut webhook: SecurityEventWebhook,
        hash: String,
        dependencies: Dependencies,
        reason: HealthReason,
        message: impl Into<String>,
    ) {
        let message = message.into();
        warn!(
            webhook = %webhook.name(),
            uid = %webhook.uid(),
            reason = %reason,
            error = %message,
            "Webhook validation failed"
        );

        webhook.set_health(false, reason, message, self.config.clock.now());
        self.rejections.insert(
            webhook.uid().clone(),
            Rejection {
                spec_hash: hash,
                swallow_echo: true,
                dependencies,
                webhook: webhook.clone(),
            },
        );
        self.outbox.push(webhook);
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
