//! # Webhook Resource Model
//!
//! The externally persisted `SecurityEventWebhook` resource, its spec, and
//! the single `Healthy` condition the controller maintains on its status.
//!
//! The `Healthy` condition's `last_transition_time` doubles as the fetch
//! watermark: the next fetch window starts where the last successful one
//! ended.

use crate::WebhookUid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Annotation holding comma-separated `key:value` labels attached to every
/// dispatched event
pub const LABELS_ANNOTATION: &str = "security-event-webhooks/labels";

/// The only condition type maintained by the controller
pub const HEALTHY_CONDITION: &str = "Healthy";

/// Message used for every healthy status
pub const HEALTHY_MESSAGE: &str = "the webhook is healthy";

// ============================================================================
// Core Types
// ============================================================================

/// Identity and bookkeeping metadata of a stored resource
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Human readable name, unique within the store
    pub name: String,

    /// Stable identity assigned by the store
    #[serde(default, skip_serializing_if = "WebhookUid::is_empty")]
    pub uid: WebhookUid,

    /// Store-assigned version, changes on every write
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    /// Free-form annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Security event webhook configuration resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEventWebhook {
    pub metadata: ObjectMeta,
    pub spec: WebhookSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<WebhookCondition>,
}

/// Desired state of a webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSpec {
    /// Family of the external system receiving events
    pub consumer: WebhookConsumer,

    /// Desired processing state
    pub state: WebhookState,

    /// Event selection query
    pub query: String,

    /// Consumer specific configuration, in declaration order
    #[serde(default)]
    pub config: Vec<ConfigVar>,
}

/// External system a webhook dispatches to
///
/// Unknown consumer names survive a round trip through the store so that
/// they can be reported back on the status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WebhookConsumer {
    Slack,
    Jira,
    Generic,
    Other(String),
}

impl WebhookConsumer {
    /// Get the wire name of the consumer
    pub fn as_str(&self) -> &str {
        match self {
            Self::Slack => "Slack",
            Self::Jira => "Jira",
            Self::Generic => "Generic",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for WebhookConsumer {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Slack" => Self::Slack,
            "Jira" => Self::Jira,
            "Generic" => Self::Generic,
            _ => Self::Other(value),
        }
    }
}

impl From<WebhookConsumer> for String {
    fn from(value: WebhookConsumer) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WebhookConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired processing state of a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WebhookState {
    /// Events are fetched and delivered
    Enabled,
    /// Nothing runs; status reports the webhook as unhealthy
    Disabled,
    /// Events are fetched but only logged, never delivered
    Debug,
    /// A single synthetic event is delivered, then the webhook is enabled
    Test,
}

impl fmt::Display for WebhookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::Debug => "Debug",
            Self::Test => "Test",
        };
        f.write_str(s)
    }
}

/// Named configuration entry, literal or referencing a ConfigMap/Secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVar {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ConfigVarSource>,
}

impl ConfigVar {
    /// Create literal configuration entry
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            value_from: None,
        }
    }

    /// Create entry referencing a Secret key
    pub fn from_secret(name: impl Into<String>, selector: KeySelector) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            value_from: Some(ConfigVarSource {
                config_map_key_ref: None,
                secret_key_ref: Some(selector),
            }),
        }
    }

    /// Create entry referencing a ConfigMap key
    pub fn from_config_map(name: impl Into<String>, selector: KeySelector) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            value_from: Some(ConfigVarSource {
                config_map_key_ref: Some(selector),
                secret_key_ref: None,
            }),
        }
    }
}

/// Indirect value source; exactly one reference is expected
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigVarSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
}

/// Reference to a single key of a ConfigMap or Secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySelector {
    /// Namespace of the referenced object; the controller default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub key: String,
}

impl KeySelector {
    /// Create selector in the default namespace
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            key: key.into(),
        }
    }
}

/// Status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub reason: String,
    pub status: ConditionStatus,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl WebhookCondition {
    /// Whether the condition reports a healthy webhook
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Boolean condition status in its wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Reason tag attached to the `Healthy` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthReason {
    WebhookState,
    QueryParsing,
    QueryValidation,
    ConfigurationParsing,
    ConsumerDiscovery,
    ConsumerConfigurationValidation,
    WebhookValidation,
    SecurityEventsProcessing,
    TestEventDelivery,
}

impl HealthReason {
    /// Get the wire form of the reason
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebhookState => "WebhookState",
            Self::QueryParsing => "QueryParsing",
            Self::QueryValidation => "QueryValidation",
            Self::ConfigurationParsing => "ConfigurationParsing",
            Self::ConsumerDiscovery => "ConsumerDiscovery",
            Self::ConsumerConfigurationValidation => "ConsumerConfigurationValidation",
            Self::WebhookValidation => "WebhookValidation",
            Self::SecurityEventsProcessing => "SecurityEventsProcessing",
            Self::TestEventDelivery => "TestEventDelivery",
        }
    }
}

impl fmt::Display for HealthReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Behaviour
// ============================================================================

impl WebhookSpec {
    /// Content hash used to detect spec changes
    ///
    /// Two specs hash equally if and only if their serialized forms are
    /// identical, so reordering config entries counts as a change.
    pub fn content_hash(&self) -> String {
        // Serializing plain structs and vectors cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

impl SecurityEventWebhook {
    /// Create a webhook without identity or status
    pub fn new(name: impl Into<String>, spec: WebhookSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
            spec,
            status: Vec::new(),
        }
    }

    /// Stable identity
    pub fn uid(&self) -> &WebhookUid {
        &self.metadata.uid
    }

    /// Human readable name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Most recent `Healthy` condition, if any
    pub fn health_condition(&self) -> Option<&WebhookCondition> {
        self.status
            .iter()
            .filter(|c| c.condition_type == HEALTHY_CONDITION)
            .max_by_key(|c| c.last_transition_time)
    }

    /// End of the last processed fetch window
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.health_condition().map(|c| c.last_transition_time)
    }

    /// Replace the status with a single `Healthy` condition
    pub fn set_health(
        &mut self,
        healthy: bool,
        reason: HealthReason,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.status = vec![WebhookCondition {
            condition_type: HEALTHY_CONDITION.to_string(),
            reason: reason.as_str().to_string(),
            status: healthy.into(),
            message: message.into(),
            last_transition_time: at,
        }];
    }

    /// Labels attached to every dispatched event
    ///
    /// Parsed from the [`LABELS_ANNOTATION`] annotation. Items are separated
    /// by commas; an item without `:` becomes a label with an empty value.
    pub fn labels(&self) -> HashMap<String, String> {
        let Some(raw) = self.metadata.annotations.get(LABELS_ANNOTATION) else {
            return HashMap::new();
        };

        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| match item.split_once(':') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (item.to_string(), String::new()),
            })
            .filter(|(key, _)| !key.is_empty())
            .collect()
    }
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
