//! # Resource Store Interfaces
//!
//! Boundaries to the stores holding webhook configurations and the
//! ConfigMaps/Secrets they reference.
//!
//! The webhook store follows list+watch semantics: a list returns a snapshot
//! and the resource version it was taken at, and a watch opened from that
//! version streams every subsequent change until the store ends it.

use crate::webhook::SecurityEventWebhook;
use crate::WebhookUid;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// ============================================================================
// Webhook Store
// ============================================================================

/// Change notification delivered on a watch stream
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(SecurityEventWebhook),
    Modified(SecurityEventWebhook),
    Deleted(SecurityEventWebhook),
    /// The store failed; the stream ends after this event
    Error(StoreError),
}

/// Stream of watch notifications; ends on server-side timeout or error
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Snapshot returned by a list call
#[derive(Debug, Clone, Default)]
pub struct WebhookList {
    pub items: Vec<SecurityEventWebhook>,

    /// Version to open the follow-up watch from
    pub resource_version: String,
}

/// Store of webhook configurations
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// List every configuration
    async fn list(&self) -> Result<WebhookList, StoreError>;

    /// Watch for changes made after `resource_version`
    async fn watch(&self, resource_version: &str) -> Result<WatchStream, StoreError>;

    /// Read the current state of a single configuration
    async fn read(&self, uid: &WebhookUid) -> Result<SecurityEventWebhook, StoreError>;

    /// Persist the given configuration, returning the stored object
    ///
    /// Used to write back status and, for webhooks in the `Test` state,
    /// the promoted state. A non-empty resource version must match the stored
    /// one, otherwise the write fails with [`StoreError::Conflict`].
    async fn update(
        &self,
        webhook: &SecurityEventWebhook,
    ) -> Result<SecurityEventWebhook, StoreError>;
}

// ============================================================================
// Dependency Store
// ============================================================================

/// Kind of object a config var may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    ConfigMap,
    Secret,
}

impl DependencyKind {
    /// Lower-case plural used in not-found messages and directory names
    pub fn plural(&self) -> &'static str {
        match self {
            Self::ConfigMap => "configmaps",
            Self::Secret => "secrets",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigMap => f.write_str("ConfigMap"),
            Self::Secret => f.write_str("Secret"),
        }
    }
}

/// Kind of change observed on a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyChange {
    Modified,
    Deleted,
}

/// Notification that a ConfigMap or Secret changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEvent {
    pub kind: DependencyKind,
    pub change: DependencyChange,
    pub namespace: String,
    pub name: String,
}

/// Read access to ConfigMaps and Secrets
#[async_trait]
pub trait DependencyStore: Send + Sync {
    /// Fetch all key/value pairs of the named object
    async fn get(
        &self,
        kind: DependencyKind,
        namespace: &str,
        name: &str,
    ) -> Result<HashMap<String, String>, StoreError>;
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by webhook and dependency stores
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Object does not exist; `resource` is the lower-case plural kind
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    /// Object was written by somebody else since the given version was read
    #[error("{resource} \"{name}\" has been modified since it was read")]
    Conflict { resource: String, name: String },

    /// Stored data could not be decoded or encoded
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// Underlying storage could not be read or written
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Watch requested from a version whose changes were already discarded
    #[error("resource version {resource_version} is too old")]
    Expired { resource_version: String },

    /// Store temporarily unavailable
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}

impl StoreError {
    /// Create a not-found error for a dependency
    pub fn not_found(kind: DependencyKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: kind.plural().to_string(),
            name: name.into(),
        }
    }

    /// Check if error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Unavailable { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
