//! # In-Memory Webhook Store
//!
//! Thread-safe in-memory implementation of [`WebhookStore`] for testing and
//! development.
//!
//! Every write is assigned a monotonically increasing resource version and
//! recorded in a change log, so a watch opened from a list's version sees
//! exactly the changes made after that list. Tests can also simulate watch
//! gaps: [`InMemoryWebhookStore::delete_silently`] removes an object without
//! notifying anybody and [`InMemoryWebhookStore::close_watches`] ends every
//! open watch stream.
//!
//! Opening a watch discards the log entries up to its start version; a later
//! watch from an older version fails with [`StoreError::Expired`] and the
//! caller has to list again.

use crate::store::{StoreError, WatchEvent, WatchStream, WebhookList, WebhookStore};
use crate::webhook::SecurityEventWebhook;
use crate::WebhookUid;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

const RESOURCE: &str = "securityeventwebhooks";

#[derive(Default)]
struct Inner {
    objects: BTreeMap<WebhookUid, SecurityEventWebhook>,
    version: u64,
    log: Vec<(u64, WatchEvent)>,
    /// Highest version dropped from the log
    compacted: u64,
    watchers: Vec<mpsc::UnboundedSender<WatchEvent>>,
    fail_updates: bool,
    updates: Vec<SecurityEventWebhook>,
    list_calls: usize,
}

impl Inner {
    fn record(&mut self, event: WatchEvent) {
        self.log.push((self.version, event.clone()));
        self.watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }
}

/// In-memory webhook configuration store
///
/// ```rust
/// use webhooks_processor_core::adapters::InMemoryWebhookStore;
/// use webhooks_processor_core::store::WebhookStore;
/// use webhooks_processor_core::webhook::{SecurityEventWebhook, WebhookConsumer, WebhookSpec, WebhookState};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryWebhookStore::new();
/// let created = store.create(SecurityEventWebhook::new(
///     "alerts",
///     WebhookSpec {
///         consumer: WebhookConsumer::Generic,
///         state: WebhookState::Enabled,
///         query: "type = waf".to_string(),
///         config: Vec::new(),
///     },
/// ));
///
/// let list = store.list().await.unwrap();
/// assert_eq!(list.items[0].uid(), created.uid());
/// assert_eq!(list.resource_version, "1");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryWebhookStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWebhookStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a configuration, assigning a UID when it has none
    pub fn create(&self, mut webhook: SecurityEventWebhook) -> SecurityEventWebhook {
        let mut inner = self.lock();
        if webhook.metadata.uid.is_empty() {
            webhook.metadata.uid = WebhookUid::generate();
        }
        webhook.metadata.resource_version = inner.next_version();
        inner
            .objects
            .insert(webhook.uid().clone(), webhook.clone());
        inner.record(WatchEvent::Added(webhook.clone()));
        webhook
    }

    /// Replace a stored configuration, as a user editing it would
    pub fn modify(&self, mut webhook: SecurityEventWebhook) -> Option<SecurityEventWebhook> {
        let mut inner = self.lock();
        if !inner.objects.contains_key(webhook.uid()) {
            return None;
        }
        webhook.metadata.resource_version = inner.next_version();
        inner
            .objects
            .insert(webhook.uid().clone(), webhook.clone());
        inner.record(WatchEvent::Modified(webhook.clone()));
        Some(webhook)
    }

    /// Remove a configuration and notify watchers
    pub fn delete(&self, uid: &WebhookUid) -> Option<SecurityEventWebhook> {
        let mut inner = self.lock();
        let mut removed = inner.objects.remove(uid)?;
        removed.metadata.resource_version = inner.next_version();
        inner.record(WatchEvent::Deleted(removed.clone()));
        Some(removed)
    }

    /// Remove a configuration without any watch notification
    pub fn delete_silently(&self, uid: &WebhookUid) -> Option<SecurityEventWebhook> {
        let mut inner = self.lock();
        let removed = inner.objects.remove(uid)?;
        inner.next_version();
        Some(removed)
    }

    /// End every open watch stream
    pub fn close_watches(&self) {
        self.lock().watchers.clear();
    }

    /// Make every subsequent update fail, or succeed again
    pub fn fail_updates(&self, fail: bool) {
        self.lock().fail_updates = fail;
    }

    /// Current state of a configuration
    pub fn get(&self, uid: &WebhookUid) -> Option<SecurityEventWebhook> {
        self.lock().objects.get(uid).cloned()
    }

    /// Every successful update, oldest first
    pub fn updates(&self) -> Vec<SecurityEventWebhook> {
        self.lock().updates.clone()
    }

    /// Number of list calls served
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Number of change log entries kept for future watches
    pub fn log_len(&self) -> usize {
        self.lock().log.len()
    }

    /// Number of open watch streams
    pub fn watch_count(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|tx| !tx.is_closed());
        inner.watchers.len()
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn list(&self) -> Result<WebhookList, StoreError> {
        let mut inner = self.lock();
        inner.list_calls += 1;
        Ok(WebhookList {
            items: inner.objects.values().cloned().collect(),
            resource_version: inner.version.to_string(),
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream, StoreError> {
        let from: u64 = resource_version
            .parse()
            .map_err(|_| StoreError::Serialization {
                message: format!("invalid resource version '{}'", resource_version),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if from < inner.compacted {
            return Err(StoreError::Expired {
                resource_version: resource_version.to_string(),
            });
        }

        inner.log.retain(|(version, _)| *version > from);
        inner.compacted = from;
        for (_, event) in &inner.log {
            // The receiver is still in scope, so this cannot fail.
            let _ = tx.send(event.clone());
        }
        inner.watchers.push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }

    async fn read(&self, uid: &WebhookUid) -> Result<SecurityEventWebhook, StoreError> {
        self.lock()
            .objects
            .get(uid)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                resource: RESOURCE.to_string(),
                name: uid.to_string(),
            })
    }

    async fn update(
        &self,
        webhook: &SecurityEventWebhook,
    ) -> Result<SecurityEventWebhook, StoreError> {
        let mut inner = self.lock();
        if inner.fail_updates {
            return Err(StoreError::Unavailable {
                message: "updates are failing".to_string(),
            });
        }
        let Some(current) = inner.objects.get(webhook.uid()) else {
            return Err(StoreError::NotFound {
                resource: RESOURCE.to_string(),
                name: webhook.name().to_string(),
            });
        };
        let version = &webhook.metadata.resource_version;
        if !version.is_empty() && *version != current.metadata.resource_version {
            return Err(StoreError::Conflict {
                resource: RESOURCE.to_string(),
                name: webhook.name().to_string(),
            });
        }

        let mut stored = webhook.clone();
        stored.metadata.resource_version = inner.next_version();
        inner.objects.insert(stored.uid().clone(), stored.clone());
        inner.updates.push(stored.clone());
        inner.record(WatchEvent::Modified(stored.clone()));
        Ok(stored)
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
