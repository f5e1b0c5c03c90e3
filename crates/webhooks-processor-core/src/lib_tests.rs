use super::*;

#[test]
fn test_generated_uids_are_unique() {
    let first = WebhookUid::generate();
    let second = WebhookUid::generate();

    assert_ne!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn test_uid_serializes_as_plain_string() {
    let uid = WebhookUid::new("abc-123");

    let json = serde_json::to_string(&uid).unwrap();
    assert_eq!(json, "\"abc-123\"");

    let back: WebhookUid = serde_json::from_str(&json).unwrap();
    assert_eq!(back, uid);
}

#[test]
fn test_default_uid_is_empty() {
    assert!(WebhookUid::default().is_empty());
    assert_eq!(WebhookUid::from("x").to_string(), "x");
}
