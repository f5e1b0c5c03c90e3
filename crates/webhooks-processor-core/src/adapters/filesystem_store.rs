//! # Filesystem Stores
//!
//! Local filesystem implementations of [`WebhookStore`] and
//! [`DependencyStore`] for development and single-node deployments.
//!
//! Layout:
//!
//! ```text
//! {webhooks_dir}/{name}.yaml                            one webhook per file
//! {dependencies_dir}/{namespace}/configmaps/{name}.yaml flat key/value map
//! {dependencies_dir}/{namespace}/secrets/{name}.yaml    flat key/value map
//! ```
//!
//! Watches are implemented by polling the directory and diffing successive
//! snapshots; a watch ends after the configured watch timeout, like a
//! server-side watch timeout would. Writes go through a temporary file and a
//! rename so readers never observe a partial file.

use crate::store::{
    DependencyChange, DependencyEvent, DependencyKind, DependencyStore, StoreError, WatchEvent,
    WatchStream, WebhookList, WebhookStore,
};
use crate::webhook::SecurityEventWebhook;
use crate::WebhookUid;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RESOURCE: &str = "securityeventwebhooks";

/// Settings of the filesystem stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemStoreConfig {
    pub webhooks_dir: PathBuf,
    pub dependencies_dir: PathBuf,

    /// Interval between directory scans of watches and the dependency poller
    pub poll_interval_ms: u64,

    /// Lifetime of a single watch stream
    pub watch_timeout_seconds: u64,
}

impl Default for FilesystemStoreConfig {
    fn default() -> Self {
        Self {
            webhooks_dir: PathBuf::from("./data/webhooks"),
            dependencies_dir: PathBuf::from("./data/dependencies"),
            poll_interval_ms: 1_000,
            watch_timeout_seconds: 300,
        }
    }
}

impl FilesystemStoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_seconds)
    }
}

type Snapshot = BTreeMap<WebhookUid, SecurityEventWebhook>;

#[derive(Debug, Default)]
struct StoreState {
    paths: HashMap<WebhookUid, PathBuf>,
    last_list: Option<(String, Snapshot)>,
}

// ============================================================================
// Webhook Store
// ============================================================================

/// Webhook store over a directory of YAML files
#[derive(Debug, Clone)]
pub struct FilesystemWebhookStore {
    dir: PathBuf,
    poll_interval: Duration,
    watch_timeout: Duration,
    state: Arc<Mutex<StoreState>>,
}

impl FilesystemWebhookStore {
    /// Create the store, creating the directory if needed
    pub async fn new(config: &FilesystemStoreConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.webhooks_dir).await?;

        info!(dir = %config.webhooks_dir.display(), "Using filesystem webhook store");

        Ok(Self {
            dir: config.webhooks_dir.clone(),
            poll_interval: config.poll_interval(),
            watch_timeout: config.watch_timeout(),
            state: Arc::new(Mutex::new(StoreState::default())),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read every webhook file, assigning and persisting UIDs where missing
    async fn load(&self) -> Result<Snapshot, StoreError> {
        let mut snapshot = Snapshot::new();
        let mut paths = HashMap::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_yaml(&path) {
                continue;
            }

            let mut bytes = match fs::read(&path).await {
                Ok(bytes) => bytes,
                // Removed between listing the directory and reading it.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut webhook: SecurityEventWebhook = match serde_yaml::from_slice(&bytes) {
                Ok(webhook) => webhook,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable webhook file");
                    continue;
                }
            };

            if webhook.metadata.name.is_empty() {
                webhook.metadata.name = file_stem(&path);
            }
            if webhook.metadata.uid.is_empty() {
                webhook.metadata.uid = WebhookUid::generate();
                bytes = write_atomically(&path, &webhook).await?;
                debug!(path = %path.display(), uid = %webhook.uid(), "Assigned webhook UID");
            }
            if snapshot.contains_key(webhook.uid()) {
                warn!(path = %path.display(), uid = %webhook.uid(), "Skipping webhook with duplicate UID");
                continue;
            }

            webhook.metadata.resource_version = digest(&bytes);
            paths.insert(webhook.uid().clone(), path);
            snapshot.insert(webhook.uid().clone(), webhook);
        }

        self.lock().paths = paths;
        Ok(snapshot)
    }
}

#[async_trait]
impl WebhookStore for FilesystemWebhookStore {
    async fn list(&self) -> Result<WebhookList, StoreError> {
        let snapshot = self.load().await?;

        let mut hasher = Sha256::new();
        for (uid, webhook) in &snapshot {
            hasher.update(uid.as_str().as_bytes());
            hasher.update(webhook.metadata.resource_version.as_bytes());
        }
        let resource_version = hex::encode(&hasher.finalize()[..8]);

        let items = snapshot.values().cloned().collect();
        self.lock().last_list = Some((resource_version.clone(), snapshot));

        Ok(WebhookList {
            items,
            resource_version,
        })
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchStream, StoreError> {
        let listed = self
            .lock()
            .last_list
            .take()
            .filter(|(version, _)| version == resource_version)
            .map(|(_, snapshot)| snapshot);
        let baseline = match listed {
            Some(snapshot) => snapshot,
            None => self.load().await?,
        };

        let state = WatchState {
            store: self.clone(),
            baseline,
            deadline: Instant::now() + self.watch_timeout,
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((event, state));
                }
                if state.done || Instant::now() >= state.deadline {
                    return None;
                }

                tokio::time::sleep(state.store.poll_interval).await;

                match state.store.load().await {
                    Ok(current) => {
                        state.pending.extend(diff(&state.baseline, &current));
                        state.baseline = current;
                    }
                    Err(e) => {
                        state.pending.push_back(WatchEvent::Error(e));
                        state.done = true;
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn read(&self, uid: &WebhookUid) -> Result<SecurityEventWebhook, StoreError> {
        let not_found = || StoreError::NotFound {
            resource: RESOURCE.to_string(),
            name: uid.to_string(),
        };

        let path = self.lock().paths.get(uid).cloned().ok_or_else(not_found)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let mut webhook: SecurityEventWebhook = serde_yaml::from_slice(&bytes)?;
        if webhook.uid() != uid {
            return Err(not_found());
        }
        if webhook.metadata.name.is_empty() {
            webhook.metadata.name = file_stem(&path);
        }
        webhook.metadata.resource_version = digest(&bytes);
        Ok(webhook)
    }

    async fn update(
        &self,
        webhook: &SecurityEventWebhook,
    ) -> Result<SecurityEventWebhook, StoreError> {
        let not_found = || StoreError::NotFound {
            resource: RESOURCE.to_string(),
            name: webhook.name().to_string(),
        };

        let path = self
            .lock()
            .paths
            .get(webhook.uid())
            .cloned()
            .ok_or_else(not_found)?;

        // The file may have been replaced by a different object since it was read.
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };
        let current: SecurityEventWebhook = serde_yaml::from_slice(&bytes)?;
        if current.uid() != webhook.uid() {
            return Err(not_found());
        }

        let version = &webhook.metadata.resource_version;
        if !version.is_empty() && *version != digest(&bytes) {
            return Err(StoreError::Conflict {
                resource: RESOURCE.to_string(),
                name: webhook.name().to_string(),
            });
        }

        let mut stored = webhook.clone();
        let bytes = write_atomically(&path, &stored).await?;
        stored.metadata.resource_version = digest(&bytes);
        Ok(stored)
    }
}

struct WatchState {
    store: FilesystemWebhookStore,
    baseline: Snapshot,
    deadline: Instant,
    pending: VecDeque<WatchEvent>,
    done: bool,
}

fn diff(previous: &Snapshot, current: &Snapshot) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    for (uid, webhook) in current {
        match previous.get(uid) {
            None => events.push(WatchEvent::Added(webhook.clone())),
            Some(old) if old.metadata.resource_version != webhook.metadata.resource_version => {
                events.push(WatchEvent::Modified(webhook.clone()))
            }
            Some(_) => {}
        }
    }
    for (uid, webhook) in previous {
        if !current.contains_key(uid) {
            events.push(WatchEvent::Deleted(webhook.clone()));
        }
    }
    events
}

// ============================================================================
// Dependency Store
// ============================================================================

/// ConfigMap/Secret store over a directory tree of YAML maps
#[derive(Debug, Clone)]
pub struct FilesystemDependencyStore {
    dir: PathBuf,
}

impl FilesystemDependencyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, kind: DependencyKind, namespace: &str, name: &str) -> Option<PathBuf> {
        let valid = |part: &str| !part.is_empty() && part != ".." && !part.contains(['/', '\\']);
        if !valid(namespace) || !valid(name) {
            return None;
        }
        Some(
            self.dir
                .join(namespace)
                .join(kind.plural())
                .join(format!("{}.yaml", name)),
        )
    }
}

#[async_trait]
impl DependencyStore for FilesystemDependencyStore {
    async fn get(
        &self,
        kind: DependencyKind,
        namespace: &str,
        name: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        let path = self
            .path(kind, namespace, name)
            .ok_or_else(|| StoreError::not_found(kind, name))?;

        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_yaml::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(kind, name))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Emits [`DependencyEvent`]s for ConfigMap/Secret files that change or
/// disappear under a dependency directory
///
/// A file that appears is reported as modified, so configurations waiting
/// for a missing object are validated again.
#[derive(Debug, Clone)]
pub struct DependencyPoller {
    dir: PathBuf,
    interval: Duration,
}

type DependencyKey = (DependencyKind, String, String);

impl DependencyPoller {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
        }
    }

    /// Poll until cancelled or until the receiver is dropped
    pub async fn run(self, events: mpsc::Sender<DependencyEvent>, cancel: CancellationToken) {
        let mut known = match self.scan().await {
            Ok(known) => known,
            Err(e) => {
                warn!(error = %e, "Initial dependency scan failed");
                HashMap::new()
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let current = match self.scan().await {
                Ok(current) => current,
                Err(e) => {
                    warn!(error = %e, "Dependency scan failed");
                    continue;
                }
            };

            let mut changes = Vec::new();
            for (key, digest) in &known {
                match current.get(key) {
                    None => changes.push((key.clone(), DependencyChange::Deleted)),
                    Some(now) if now != digest => {
                        changes.push((key.clone(), DependencyChange::Modified))
                    }
                    Some(_) => {}
                }
            }
            for key in current.keys() {
                if !known.contains_key(key) {
                    changes.push((key.clone(), DependencyChange::Modified));
                }
            }
            known = current;

            for ((kind, namespace, name), change) in changes {
                debug!(kind = %kind, namespace = %namespace, name = %name, change = ?change, "Dependency changed");
                let event = DependencyEvent {
                    kind,
                    change,
                    namespace,
                    name,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    async fn scan(&self) -> Result<HashMap<DependencyKey, String>, StoreError> {
        let mut found = HashMap::new();
        let mut namespaces = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(namespace) = namespaces.next_entry().await? {
            if !namespace.file_type().await?.is_dir() {
                continue;
            }
            let namespace_name = namespace.file_name().to_string_lossy().into_owned();

            for kind in [DependencyKind::ConfigMap, DependencyKind::Secret] {
                let mut objects = match fs::read_dir(namespace.path().join(kind.plural())).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                while let Some(object) = objects.next_entry().await? {
                    let path = object.path();
                    if !is_yaml(&path) {
                        continue;
                    }
                    let bytes = match fs::read(&path).await {
                        Ok(bytes) => bytes,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    };
                    found.insert(
                        (kind, namespace_name.clone(), file_stem(&path)),
                        digest(&bytes),
                    );
                }
            }
        }

        Ok(found)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..8])
}

/// Serialize `webhook` into `path` through a temporary file, returning the
/// bytes written
async fn write_atomically(
    path: &Path,
    webhook: &SecurityEventWebhook,
) -> Result<Vec<u8>, StoreError> {
    let mut persisted = webhook.clone();
    persisted.metadata.resource_version.clear();
    let bytes = serde_yaml::to_string(&persisted)?.into_bytes();

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;
    Ok(bytes)
}

#[cfg(test)]
#[path = "filesystem_store_tests.rs"]
mod tests;
