use super::*;
use chrono::TimeZone;

fn test_spec() -> WebhookSpec {
    WebhookSpec {
        consumer: WebhookConsumer::Slack,
        state: WebhookState::Enabled,
        query: "type = runtime_security".to_string(),
        config: vec![ConfigVar::literal("url", "https://hooks.example.com/x")],
    }
}

// ============================================================================
// Spec hashing
// ============================================================================

mod spec_hash_tests {
    use super::*;

    #[test]
    fn test_identical_specs_hash_equally() {
        assert_eq!(test_spec().content_hash(), test_spec().content_hash());
    }

    #[test]
    fn test_any_field_change_changes_hash() {
        let base = test_spec().content_hash();

        let mut consumer = test_spec();
        consumer.consumer = WebhookConsumer::Generic;
        assert_ne!(consumer.content_hash(), base);

        let mut state = test_spec();
        state.state = WebhookState::Debug;
        assert_ne!(state.content_hash(), base);

        let mut query = test_spec();
        query.query = "type = waf".to_string();
        assert_ne!(query.content_hash(), base);

        let mut config = test_spec();
        config.config.push(ConfigVar::literal("headers", "A:b"));
        assert_ne!(config.content_hash(), base);
    }

    #[test]
    fn test_status_does_not_affect_spec_hash() {
        let mut webhook = SecurityEventWebhook::new("wh", test_spec());
        let before = webhook.spec.content_hash();

        webhook.set_health(true, HealthReason::WebhookValidation, HEALTHY_MESSAGE, Utc::now());

        assert_eq!(webhook.spec.content_hash(), before);
    }
}

// ============================================================================
// Serialization
// ============================================================================

mod serialization_tests {
    use super::*;

    #[test]
    fn test_wire_shape_round_trips() {
        let yaml = r#"
metadata:
  name: slack-alerts
  uid: 7d1f
  annotations:
    security-event-webhooks/labels: "team:secops"
spec:
  consumer: Slack
  state: Enabled
  query: type = runtime_security
  config:
    - name: url
      valueFrom:
        secretKeyRef:
          name: slack-secret
          key: url
status:
  - type: Healthy
    reason: WebhookValidation
    status: "True"
    message: the webhook is healthy
    lastTransitionTime: "2024-05-01T12:00:00Z"
"#;

        let webhook: SecurityEventWebhook = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(webhook.name(), "slack-alerts");
        assert_eq!(webhook.uid().as_str(), "7d1f");
        assert_eq!(webhook.spec.consumer, WebhookConsumer::Slack);
        let selector = webhook.spec.config[0]
            .value_from
            .as_ref()
            .and_then(|s| s.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "slack-secret");
        assert_eq!(selector.key, "url");
        assert!(selector.namespace.is_none());

        let condition = webhook.health_condition().unwrap();
        assert!(condition.is_true());
        assert_eq!(
            condition.last_transition_time,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unknown_consumer_is_preserved() {
        let consumer: WebhookConsumer = serde_json::from_str("\"PagerDuty\"").unwrap();

        assert_eq!(consumer, WebhookConsumer::Other("PagerDuty".to_string()));
        assert_eq!(serde_json::to_string(&consumer).unwrap(), "\"PagerDuty\"");
    }

    #[test]
    fn test_empty_status_is_omitted() {
        let webhook = SecurityEventWebhook::new("wh", test_spec());
        let json = serde_json::to_value(&webhook).unwrap();

        assert!(json.get("status").is_none());
    }
}

// ============================================================================
// Status helpers
// ============================================================================

mod status_tests {
    use super::*;

    #[test]
    fn test_set_health_keeps_a_single_condition() {
        let mut webhook = SecurityEventWebhook::new("wh", test_spec());
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let t2 = t1 + chrono::Duration::seconds(10);

        webhook.set_health(true, HealthReason::WebhookValidation, HEALTHY_MESSAGE, t1);
        webhook.set_health(false, HealthReason::SecurityEventsProcessing, "boom", t2);

        assert_eq!(webhook.status.len(), 1);
        let condition = &webhook.status[0];
        assert_eq!(condition.condition_type, HEALTHY_CONDITION);
        assert_eq!(condition.reason, "SecurityEventsProcessing");
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.message, "boom");
        assert_eq!(webhook.watermark(), Some(t2));
    }

    #[test]
    fn test_watermark_absent_without_healthy_condition() {
        let mut webhook = SecurityEventWebhook::new("wh", test_spec());
        assert!(webhook.watermark().is_none());

        webhook.status.push(WebhookCondition {
            condition_type: "Ready".to_string(),
            reason: "Other".to_string(),
            status: ConditionStatus::True,
            message: String::new(),
            last_transition_time: Utc::now(),
        });
        assert!(webhook.watermark().is_none());
    }
}

// ============================================================================
// Labels
// ============================================================================

mod labels_tests {
    use super::*;

    #[test]
    fn test_labels_parsed_from_annotation() {
        let mut webhook = SecurityEventWebhook::new("wh", test_spec());
        webhook.metadata.annotations.insert(
            LABELS_ANNOTATION.to_string(),
            "hips dont lie:true, anything:goes,also-this".to_string(),
        );

        let labels = webhook.labels();

        assert_eq!(labels.len(), 3);
        assert_eq!(labels["hips dont lie"], "true");
        assert_eq!(labels["anything"], "goes");
        assert_eq!(labels["also-this"], "");
    }

    #[test]
    fn test_missing_annotation_yields_no_labels() {
        let webhook = SecurityEventWebhook::new("wh", test_spec());
        assert!(webhook.labels().is_empty());
    }

    #[test]
    fn test_empty_items_are_skipped() {
        let mut webhook = SecurityEventWebhook::new("wh", test_spec());
        webhook
            .metadata
            .annotations
            .insert(LABELS_ANNOTATION.to_string(), ",, a:1 ,:orphan,".to_string());

        let labels = webhook.labels();

        assert_eq!(labels.len(), 1);
        assert_eq!(labels["a"], "1");
    }
}
