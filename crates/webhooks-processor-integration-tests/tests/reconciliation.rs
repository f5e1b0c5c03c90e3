//! Watch gaps: relisting, deletes missed while not watching, and restarts.

mod common;

use common::{event, wait_until, webhook, TestProcessor};
use std::time::Duration;
use webhooks_processor_core::webhook::WebhookState;

#[tokio::test(start_paused = true)]
async fn test_webhook_deleted_while_not_watching_is_stopped() {
    let p = TestProcessor::start();
    let waf = p
        .store
        .create(webhook("waf", WebhookState::Enabled, "type = waf"));
    p.store
        .create(webhook("alert", WebhookState::Enabled, "type = alert"));
    wait_until("both workers fetched", || p.source.fetch_count() >= 2).await;

    p.store.delete_silently(waf.uid());
    p.store.close_watches();
    wait_until("relisted", || p.store.list_calls() >= 2).await;

    let now = p.clock.now();
    p.source.push([
        event("waf-1", "waf", now + chrono::Duration::seconds(1)),
        event("alert-1", "alert", now + chrono::Duration::seconds(1)),
    ]);
    wait_until("alert delivered", || !p.consumer.deliveries().is_empty()).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(p.consumer.delivered_ids(), ["alert-1"]);
    p.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_relist_does_not_restart_running_webhooks() {
    let p = TestProcessor::start();
    let created = p
        .store
        .create(webhook("alerts", WebhookState::Enabled, "type = waf"));
    wait_until("first fetch", || p.source.fetch_count() >= 1).await;

    p.store.close_watches();
    wait_until("relisted", || p.store.list_calls() >= 2).await;
    wait_until("three fetches", || p.source.fetch_count() >= 3).await;

    let validations = p
        .store
        .updates()
        .iter()
        .filter(|w| w.uid() == created.uid())
        .filter(|w| w.health_condition().map(|c| c.reason.as_str()) == Some("WebhookValidation"))
        .count();
    assert_eq!(validations, 1);

    // A restart would reset the watermark and open an overlapping window.
    let windows = p.source.windows();
    for pair in windows.windows(2) {
        assert_eq!(pair[1].from, pair[0].to);
    }
    p.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_changes_made_during_watch_gap_are_applied() {
    let p = TestProcessor::start();
    let created = p
        .store
        .create(webhook("alerts", WebhookState::Enabled, "type = waf"));
    wait_until("first fetch", || p.source.fetch_count() >= 1).await;

    p.store.close_watches();
    let mut disabled = p.stored(created.uid());
    disabled.spec.state = WebhookState::Disabled;
    p.store.modify(disabled);

    wait_until("disabled status", || {
        p.reason(created.uid()).as_deref() == Some("WebhookState")
    })
    .await;
    let fetches = p.source.fetch_count();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(p.source.fetch_count(), fetches);
    p.shutdown().await;
}
