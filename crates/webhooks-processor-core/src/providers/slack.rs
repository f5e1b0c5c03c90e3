//! Slack incoming-webhook provider.
//!
//! Requires `url`, the incoming webhook URL. Each event is posted as a
//! message with a header, the event summary and a field block.

use super::{render_labels, required_url, summary, HttpSender, Provider, ProviderConfig, ProviderError};
use crate::event::SecurityEvent;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SlackProvider {
    sender: HttpSender,
}

impl SlackProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            sender: HttpSender::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for SlackProvider {
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError> {
        required_url(config).map(|_| ())
    }

    async fn process(
        &self,
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        let url = required_url(config)?;
        let payload = message(labels, event);

        self.sender
            .send(|client| client.post(url).json(&payload))
            .await
    }

    fn config(&self) -> &ProviderConfig {
        self.sender.config()
    }
}

fn message(labels: &HashMap<String, String>, event: &SecurityEvent) -> Value {
    let mut fields = vec![
        field("Type", &event.event_type),
        field("Severity", &event.severity.to_string()),
        field("Time", &event.time.to_rfc3339()),
    ];
    for (title, value) in [
        ("Origin", &event.origin),
        ("Host", &event.host),
        ("Source", &event.source_name),
        ("Destination", &event.dest_name),
        ("Attack vector", &event.attack_vector),
        ("MITRE tactic", &event.mitre_tactic),
    ] {
        if let Some(value) = value {
            fields.push(field(title, value));
        }
    }

    let mut blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": "Security event detected" }
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": summary(event) }
        }),
        json!({ "type": "section", "fields": fields }),
    ];

    let labels = render_labels(labels);
    if !labels.is_empty() {
        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": labels.join(" | ") }]
        }));
    }

    json!({
        "text": summary(event),
        "blocks": blocks,
    })
}

fn field(title: &str, value: &str) -> Value {
    json!({ "type": "mrkdwn", "text": format!("*{}*\n{}", title, value) })
}

#[cfg(test)]
#[path = "slack_tests.rs"]
mod tests;
