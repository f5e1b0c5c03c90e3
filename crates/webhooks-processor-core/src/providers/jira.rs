//! Jira issue provider.
//!
//! Creates one issue per event through the Jira REST API v2 using basic
//! authentication.
//!
//! | Field       | Meaning                               |
//! |-------------|---------------------------------------|
//! | `url`       | Jira base URL                         |
//! | `project`   | Project key the issue is created in   |
//! | `issueType` | Issue type name, e.g. `Bug`           |
//! | `username`  | Account used to authenticate          |
//! | `apiToken`  | API token of the account              |

use super::{render_labels, required, required_url, summary, HttpSender, Provider, ProviderConfig, ProviderError};
use crate::event::SecurityEvent;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;

const REQUIRED_FIELDS: [&str; 4] = ["project", "issueType", "username", "apiToken"];

#[derive(Debug, Clone)]
pub struct JiraProvider {
    sender: HttpSender,
}

impl JiraProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            sender: HttpSender::new(config)?,
        })
    }
}

#[async_trait]
impl Provider for JiraProvider {
    fn validate(&self, config: &HashMap<String, String>) -> Result<(), ProviderError> {
        required_url(config)?;
        for field in REQUIRED_FIELDS {
            required(config, field)?;
        }
        Ok(())
    }

    async fn process(
        &self,
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        let endpoint = format!(
            "{}/rest/api/2/issue",
            required_url(config)?.trim_end_matches('/')
        );
        let username = required(config, "username")?;
        let api_token = required(config, "apiToken")?;
        let payload = issue(
            required(config, "project")?,
            required(config, "issueType")?,
            labels,
            event,
        );

        self.sender
            .send(|client| {
                client
                    .post(&endpoint)
                    .basic_auth(username, Some(api_token))
                    .json(&payload)
            })
            .await
    }

    fn config(&self) -> &ProviderConfig {
        self.sender.config()
    }
}

fn issue(
    project: &str,
    issue_type: &str,
    labels: &HashMap<String, String>,
    event: &SecurityEvent,
) -> Value {
    let mut description = vec![
        summary(event),
        String::new(),
        format!("*Type:* {}", event.event_type),
        format!("*Severity:* {}", event.severity),
        format!("*Time:* {}", event.time.to_rfc3339()),
    ];
    if let Some(origin) = &event.origin {
        description.push(format!("*Origin:* {}", origin));
    }
    if let Some(host) = &event.host {
        description.push(format!("*Host:* {}", host));
    }
    if !event.mitre_ids.is_empty() {
        description.push(format!("*MITRE IDs:* {}", event.mitre_ids.join(", ")));
    }
    if !event.mitigations.is_empty() {
        description.push(String::new());
        description.push("*Mitigations:*".to_string());
        description.extend(event.mitigations.iter().map(|m| format!("* {}", m)));
    }
    let labels = render_labels(labels);
    if !labels.is_empty() {
        description.push(String::new());
        description.push(format!("*Labels:* {}", labels.join(", ")));
    }

    json!({
        "fields": {
            "project": { "key": project },
            "issuetype": { "name": issue_type },
            "summary": format!("[{}] {}", event.event_type, summary(event)),
            "description": description.join("\n"),
        }
    })
}

#[cfg(test)]
#[path = "jira_tests.rs"]
mod tests;
