//! Security events as returned by the event store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,

    pub time: DateTime<Utc>,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub severity: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_vector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitre_tactic: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitre_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mitigations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
}

/// Value of an event field as seen by the query engine
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(i64),
    List(&'a [String]),
}

impl SecurityEvent {
    /// Create an event with the mandatory fields set
    pub fn new(id: impl Into<String>, event_type: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            time,
            event_type: event_type.into(),
            description: String::new(),
            severity: 0,
            origin: None,
            name: None,
            host: None,
            source_ip: None,
            source_name: None,
            source_namespace: None,
            dest_ip: None,
            dest_name: None,
            dest_namespace: None,
            attack_vector: None,
            mitre_tactic: None,
            mitre_ids: Vec::new(),
            mitigations: Vec::new(),
            record: None,
        }
    }

    /// Synthetic event delivered when a webhook is in the `Test` state
    pub fn test_event(time: DateTime<Utc>) -> Self {
        Self {
            description: "[TEST] Security event webhook test event".to_string(),
            severity: 0,
            origin: Some("webhooks-processor".to_string()),
            ..Self::new("test-event", "test", time)
        }
    }

    /// Look up a field by its query name
    pub fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Text(&self.id)),
            "type" => Some(FieldValue::Text(&self.event_type)),
            "description" => Some(FieldValue::Text(&self.description)),
            "severity" => Some(FieldValue::Number(self.severity)),
            "origin" => text(&self.origin),
            "name" => text(&self.name),
            "host" => text(&self.host),
            "source_ip" => text(&self.source_ip),
            "source_name" => text(&self.source_name),
            "source_namespace" => text(&self.source_namespace),
            "dest_ip" => text(&self.dest_ip),
            "dest_name" => text(&self.dest_name),
            "dest_namespace" => text(&self.dest_namespace),
            "attack_vector" => text(&self.attack_vector),
            "mitre_tactic" => text(&self.mitre_tactic),
            "mitre_ids" => Some(FieldValue::List(&self.mitre_ids)),
            "mitigations" => Some(FieldValue::List(&self.mitigations)),
            _ => None,
        }
    }
}

fn text(value: &Option<String>) -> Option<FieldValue<'_>> {
    value.as_deref().map(FieldValue::Text)
}
