use super::*;
use crate::webhook::{WebhookConsumer, WebhookSpec, WebhookState};
use futures::StreamExt;
use std::time::Duration;

fn webhook(name: &str) -> SecurityEventWebhook {
    SecurityEventWebhook::new(
        name,
        WebhookSpec {
            consumer: WebhookConsumer::Generic,
            state: WebhookState::Enabled,
            query: "type = waf".to_string(),
            config: Vec::new(),
        },
    )
}

async fn next(stream: &mut WatchStream) -> Option<WatchEvent> {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_create_assigns_identity() {
    let store = InMemoryWebhookStore::new();

    let created = store.create(webhook("a"));

    assert!(!created.uid().is_empty());
    assert_eq!(created.metadata.resource_version, "1");
    assert_eq!(store.list().await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn test_watch_replays_changes_after_list() {
    let store = InMemoryWebhookStore::new();
    store.create(webhook("before"));
    let list = store.list().await.unwrap();
    let after = store.create(webhook("after"));

    let mut stream = store.watch(&list.resource_version).await.unwrap();

    match next(&mut stream).await {
        Some(WatchEvent::Added(w)) => assert_eq!(w.uid(), after.uid()),
        other => panic!("expected Added, got {:?}", other),
    }
}

#[tokio::test]
async fn test_watch_streams_live_changes() {
    let store = InMemoryWebhookStore::new();
    let list = store.list().await.unwrap();
    let mut stream = store.watch(&list.resource_version).await.unwrap();

    let created = store.create(webhook("a"));
    store.delete(created.uid());

    assert!(matches!(next(&mut stream).await, Some(WatchEvent::Added(_))));
    assert!(matches!(next(&mut stream).await, Some(WatchEvent::Deleted(_))));
}

#[tokio::test]
async fn test_silent_delete_is_not_streamed() {
    let store = InMemoryWebhookStore::new();
    let created = store.create(webhook("a"));
    let list = store.list().await.unwrap();
    let mut stream = store.watch(&list.resource_version).await.unwrap();

    store.delete_silently(created.uid());
    store.close_watches();

    assert!(next(&mut stream).await.is_none());
    assert!(store.list().await.unwrap().items.is_empty());
}

#[tokio::test]
async fn test_update_records_and_echoes() {
    let store = InMemoryWebhookStore::new();
    let created = store.create(webhook("a"));
    let list = store.list().await.unwrap();
    let mut stream = store.watch(&list.resource_version).await.unwrap();

    let mut changed = created.clone();
    changed.set_health(
        true,
        crate::webhook::HealthReason::WebhookValidation,
        crate::webhook::HEALTHY_MESSAGE,
        chrono::Utc::now(),
    );
    let stored = store.update(&changed).await.unwrap();

    assert_eq!(stored.status.len(), 1);
    assert_eq!(store.updates().len(), 1);
    assert!(matches!(next(&mut stream).await, Some(WatchEvent::Modified(_))));
}

#[tokio::test]
async fn test_update_failures() {
    let store = InMemoryWebhookStore::new();
    let created = store.create(webhook("a"));

    store.fail_updates(true);
    assert!(store.update(&created).await.unwrap_err().is_transient());

    store.fail_updates(false);
    store.delete(created.uid());
    assert!(matches!(
        store.update(&created).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_update_against_outdated_version_conflicts() {
    let store = InMemoryWebhookStore::new();
    let created = store.create(webhook("a"));
    let mut edited = created.clone();
    edited.spec.query = "type = alert".to_string();
    store.modify(edited);

    let result = store.update(&created).await;

    assert!(matches!(result, Err(StoreError::Conflict { .. })));
    assert!(!result.unwrap_err().is_transient());
    let current = store.read(created.uid()).await.unwrap();
    assert_eq!(current.spec.query, "type = alert");
    assert_eq!(current.metadata.resource_version, "2");
}

#[tokio::test]
async fn test_read_of_unknown_webhook_is_not_found() {
    let store = InMemoryWebhookStore::new();

    let err = store.read(&WebhookUid::new("missing")).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "securityeventwebhooks \"missing\" not found"
    );
}

#[tokio::test]
async fn test_watch_discards_replayed_history() {
    let store = InMemoryWebhookStore::new();
    let first = store.create(webhook("a"));
    store.create(webhook("b"));
    assert_eq!(store.log_len(), 2);

    let _stream = store.watch(&first.metadata.resource_version).await.unwrap();
    assert_eq!(store.log_len(), 1);

    let list = store.list().await.unwrap();
    let _stream = store.watch(&list.resource_version).await.unwrap();
    assert_eq!(store.log_len(), 0);
}

#[tokio::test]
async fn test_watch_from_discarded_version_expires() {
    let store = InMemoryWebhookStore::new();
    let stale = store.list().await.unwrap();
    store.create(webhook("a"));
    let fresh = store.list().await.unwrap();
    let _stream = store.watch(&fresh.resource_version).await.unwrap();

    let result = store.watch(&stale.resource_version).await;

    assert!(matches!(result, Err(StoreError::Expired { .. })));
    let mut stream = store.watch(&fresh.resource_version).await.unwrap();
    store.create(webhook("b"));
    assert!(matches!(next(&mut stream).await, Some(WatchEvent::Added(_))));
}
