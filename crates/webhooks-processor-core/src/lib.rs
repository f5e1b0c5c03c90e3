//! # Webhooks Processor Core
//!
//! Control-plane logic that turns declarative security event webhook
//! configurations into live, rate-limited dispatch pipelines.
//!
//! Each [`SecurityEventWebhook`](webhook::SecurityEventWebhook) selects a
//! subset of security events through a [`Query`](query::Query) and forwards
//! matching events to an external consumer (Slack, Jira or a generic HTTP
//! endpoint). Health is reported back onto the configuration's status.
//!
//! ## Architecture
//!
//! - [`controller::WebhookWatcherUpdater`] lists and watches the configuration
//!   store, repairs watch gaps, and persists status updates.
//! - [`controller::WebhookController`] multiplexes configuration events,
//!   dependency events and outgoing status updates.
//! - [`controller::ControllerState`] keeps exactly one worker per
//!   configuration and decides when to start, update or restart it.
//! - Workers poll the event store on a fixed interval in non-overlapping
//!   windows and dispatch through a [`Provider`](providers::Provider).
//!
//! All infrastructure is abstracted behind traits ([`store::WebhookStore`],
//! [`store::DependencyStore`], [`fetcher::EventFetcher`],
//! [`providers::Provider`]) and injected at runtime.
//!
//! ## Usage
//!
//! ```rust
//! use webhooks_processor_core::WebhookUid;
//!
//! let uid = WebhookUid::new("2f1c6f0e-3d0b-4f47-9d4e-6f1b8e2c9a10");
//! assert_eq!(uid.as_str(), "2f1c6f0e-3d0b-4f47-9d4e-6f1b8e2c9a10");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod adapters;
pub mod clock;
pub mod config_resolver;
pub mod controller;
pub mod event;
pub mod fetcher;
pub mod providers;
pub mod query;
pub mod rate_limiter;
pub mod store;
pub mod webhook;

pub use clock::{Clock, SystemClock, TokioClock};
pub use event::SecurityEvent;
pub use query::Query;
pub use webhook::SecurityEventWebhook;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Stable unique identity of a webhook configuration
///
/// Assigned by the configuration store when the resource is created and never
/// reused. Human readable names can be recycled, UIDs cannot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct WebhookUid(String);

impl WebhookUid {
    /// Wrap an existing identifier
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the identifier has not been assigned yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for WebhookUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WebhookUid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
