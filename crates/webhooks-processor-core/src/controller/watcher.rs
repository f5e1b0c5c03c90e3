//! # Store Boundary
//!
//! Turns the store's list/watch protocol into a stream of [`WebhookEvent`]s
//! and writes status updates back.
//!
//! Every (re)list is reconciled against the configurations known from
//! earlier lists and watches: anything that vanished while no watch was
//! open is reported as deleted, exactly once.

use super::WebhookEvent;
use crate::store::{StoreError, WatchEvent, WatchStream, WebhookStore};
use crate::webhook::{SecurityEventWebhook, WebhookState};
use crate::WebhookUid;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watches configurations and persists their status
pub struct WebhookWatcherUpdater {
    store: Arc<dyn WebhookStore>,
    relist_backoff: Duration,
}

/// Why a watch stream stopped
enum WatchEnd {
    Relist,
    Backoff,
    Stop,
}

impl WebhookWatcherUpdater {
    pub fn new(store: Arc<dyn WebhookStore>, relist_backoff: Duration) -> Self {
        Self {
            store,
            relist_backoff,
        }
    }

    /// Forward configuration changes until `cancel` fires or the receiver is
    /// gone
    pub async fn watch(&self, events: mpsc::Sender<WebhookEvent>, cancel: CancellationToken) {
        let mut known: HashMap<WebhookUid, SecurityEventWebhook> = HashMap::new();

        loop {
            let list = tokio::select! {
                _ = cancel.cancelled() => return,
                result = self.store.list() => result,
            };

            let list = match list {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, transient = e.is_transient(), "Listing webhooks failed");
                    if !self.backoff(&cancel).await {
                        return;
                    }
                    continue;
                }
            };

            debug!(
                count = list.items.len(),
                resource_version = %list.resource_version,
                "Listed webhooks"
            );

            let listed: HashSet<WebhookUid> =
                list.items.iter().map(|w| w.uid().clone()).collect();
            let vanished: Vec<WebhookUid> = known
                .keys()
                .filter(|uid| !listed.contains(*uid))
                .cloned()
                .collect();

            for uid in vanished {
                if let Some(webhook) = known.remove(&uid) {
                    info!(
                        webhook = %webhook.name(),
                        uid = %uid,
                        "Webhook deleted while not watching"
                    );
                    if events.send(WebhookEvent::Deleted(webhook)).await.is_err() {
                        return;
                    }
                }
            }

            for webhook in list.items {
                known.insert(webhook.uid().clone(), webhook.clone());
                if events.send(WebhookEvent::Added(webhook)).await.is_err() {
                    return;
                }
            }

            let stream = match self.store.watch(&list.resource_version).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "Opening webhook watch failed");
                    if !self.backoff(&cancel).await {
                        return;
                    }
                    continue;
                }
            };

            match self.follow(stream, &mut known, &events, &cancel).await {
                WatchEnd::Stop => return,
                WatchEnd::Backoff => {
                    if !self.backoff(&cancel).await {
                        return;
                    }
                }
                WatchEnd::Relist => {
                    debug!("Webhook watch ended, relisting");
                }
            }
        }
    }

    async fn follow(
        &self,
        mut stream: WatchStream,
        known: &mut HashMap<WebhookUid, SecurityEventWebhook>,
        events: &mpsc::Sender<WebhookEvent>,
        cancel: &CancellationToken,
    ) -> WatchEnd {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return WatchEnd::Stop,
                next = stream.next() => next,
            };

            let event = match next {
                None => return WatchEnd::Relist,
                Some(WatchEvent::Added(webhook)) => {
                    known.insert(webhook.uid().clone(), webhook.clone());
                    WebhookEvent::Added(webhook)
                }
                Some(WatchEvent::Modified(webhook)) => {
                    known.insert(webhook.uid().clone(), webhook.clone());
                    WebhookEvent::Modified(webhook)
                }
                Some(WatchEvent::Deleted(webhook)) => {
                    known.remove(webhook.uid());
                    WebhookEvent::Deleted(webhook)
                }
                Some(WatchEvent::Error(e)) => {
                    warn!(error = %e, "Webhook watch failed");
                    return WatchEnd::Backoff;
                }
            };

            if events.send(event).await.is_err() {
                return WatchEnd::Stop;
            }
        }
    }

    /// Sleep for the relist backoff; `false` when cancelled meanwhile
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.relist_backoff) => true,
        }
    }

    /// Write status updates to the store until `cancel` fires
    ///
    /// Failed writes are logged and dropped; the next cycle's status
    /// supersedes them. A write rejected as outdated is retried once on top
    /// of the latest stored object, unless that object's spec has changed
    /// in the meantime or already carries a newer watermark.
    pub async fn persist(
        &self,
        mut updates: mpsc::Receiver<SecurityEventWebhook>,
        cancel: CancellationToken,
    ) {
        loop {
            let webhook = tokio::select! {
                _ = cancel.cancelled() => return,
                next = updates.recv() => match next {
                    Some(webhook) => webhook,
                    None => return,
                },
            };

            let result = match self.store.update(&webhook).await {
                Err(StoreError::Conflict { .. }) => self.retry_on_latest(&webhook).await,
                other => other.map(Some),
            };

            match result {
                Ok(Some(stored)) => {
                    debug!(
                        webhook = %stored.name(),
                        uid = %stored.uid(),
                        resource_version = %stored.metadata.resource_version,
                        "Persisted webhook status"
                    );
                }
                Ok(None) => {
                    debug!(
                        webhook = %webhook.name(),
                        uid = %webhook.uid(),
                        "Dropping status written against an outdated spec"
                    );
                }
                Err(e) => {
                    warn!(
                        webhook = %webhook.name(),
                        uid = %webhook.uid(),
                        error = %e,
                        "Failed to persist webhook status"
                    );
                }
            }
        }
    }

    async fn retry_on_latest(
        &self,
        outgoing: &SecurityEventWebhook,
    ) -> Result<Option<SecurityEventWebhook>, StoreError> {
        let latest = self.store.read(outgoing.uid()).await?;
        match rebase(outgoing, latest) {
            Some(rebased) => self.store.update(&rebased).await.map(Some),
            None => Ok(None),
        }
    }
}

/// Carry the outgoing status (and a Test to Enabled promotion) over to the
/// latest stored object; `None` when the outgoing write is stale
fn rebase(
    outgoing: &SecurityEventWebhook,
    mut latest: SecurityEventWebhook,
) -> Option<SecurityEventWebhook> {
    let mut expected = latest.spec.clone();
    if expected.state == WebhookState::Test && outgoing.spec.state == WebhookState::Enabled {
        expected.state = WebhookState::Enabled;
    }
    if expected != outgoing.spec {
        return None;
    }
    if latest.watermark() > outgoing.watermark() {
        return None;
    }

    latest.spec = expected;
    latest.status = outgoing.status.clone();
    Some(latest)
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
