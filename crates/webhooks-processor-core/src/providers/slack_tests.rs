use super::*;
use chrono::Utc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider() -> SlackProvider {
    SlackProvider::new(ProviderConfig {
        retry_duration_ms: 1,
        retry_times: 2,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_validate_requires_url() {
    let provider = provider();

    assert!(provider.validate(&HashMap::new()).is_err());
    assert!(provider
        .validate(&HashMap::from([(
            "url".to_string(),
            "https://hooks.slack.com/services/T/B/X".to_string()
        )]))
        .is_ok());
}

#[tokio::test]
async fn test_process_posts_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/hook"))
        .and(body_partial_json(serde_json::json!({
            "text": "suspicious binary executed"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let mut event = SecurityEvent::new("e1", "runtime_security", Utc::now());
    event.description = "suspicious binary executed".to_string();
    event.host = Some("node-1".to_string());
    let config = HashMap::from([(
        "url".to_string(),
        format!("{}/services/hook", server.uri()),
    )]);
    let labels = HashMap::from([("cluster".to_string(), "prod".to_string())]);

    provider().process(&config, &labels, &event).await.unwrap();
}

#[test]
fn test_message_contains_labels_and_fields() {
    let mut event = SecurityEvent::new("e1", "waf", Utc::now());
    event.origin = Some("waf-rule-942100".to_string());
    let labels = HashMap::from([("team".to_string(), "secops".to_string())]);

    let rendered = message(&labels, &event).to_string();

    assert!(rendered.contains("Security event of type waf"));
    assert!(rendered.contains("waf-rule-942100"));
    assert!(rendered.contains("team: secops"));
}
