//! Per-webhook worker.
//!
//! A ticker drives fetch cycles over consecutive windows
//! `[watermark, this_run)`. At most one cycle is in flight per worker; ticks
//! that arrive while one is running are skipped, not queued. The watermark
//! is the `Healthy` condition's transition time on the worker's snapshot.

use crate::clock::Clock;
use crate::event::SecurityEvent;
use crate::fetcher::EventFetcher;
use crate::providers::{Provider, ProviderConfig, ProviderError};
use crate::query::Query;
use crate::rate_limiter::RateLimiter;
use crate::webhook::{HealthReason, SecurityEventWebhook, WebhookState, HEALTHY_MESSAGE};
use crate::WebhookUid;
use chrono::{DateTime, Timelike, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STATUS_CORRUPTED: &str = "status corrupted";

/// Where matching events go
pub(crate) enum Dispatcher {
    Provider(Arc<dyn Provider>),
    /// Log only
    Debug,
}

impl Dispatcher {
    async fn dispatch(
        &self,
        name: &str,
        config: &HashMap<String, String>,
        labels: &HashMap<String, String>,
        event: &SecurityEvent,
    ) -> Result<(), ProviderError> {
        match self {
            Self::Provider(provider) => provider.process(config, labels, event).await,
            Self::Debug => {
                info!(
                    webhook = %name,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    severity = event.severity,
                    description = %event.description,
                    "Debug webhook matched event"
                );
                Ok(())
            }
        }
    }
}

/// Everything a worker needs, fixed for its lifetime
pub(crate) struct WorkerContext {
    pub name: String,
    pub uid: WebhookUid,
    pub test_mode: bool,
    pub query: Arc<Query>,
    pub config: Arc<HashMap<String, String>>,
    pub dispatcher: Dispatcher,
    pub fetcher: Arc<dyn EventFetcher>,
    pub clock: Arc<dyn Clock>,
    pub interval: Duration,
    pub rate_limit: ProviderConfig,
    pub status: mpsc::Sender<SecurityEventWebhook>,
}

/// State carried between fetch cycles; held locked while a cycle runs
struct FetchCycle {
    limiter: RateLimiter,
    /// Outcome of the last cycle that attempted a dispatch
    last_outcome: Result<(), String>,
}

type Snapshot = Arc<Mutex<SecurityEventWebhook>>;

/// Run the worker until `cancel` fires
pub(crate) async fn run(
    context: WorkerContext,
    initial: SecurityEventWebhook,
    mut updates: mpsc::Receiver<SecurityEventWebhook>,
    cancel: CancellationToken,
) {
    let context = Arc::new(context);
    let snapshot: Snapshot = Arc::new(Mutex::new(initial));
    let cycle = Arc::new(tokio::sync::Mutex::new(FetchCycle {
        limiter: RateLimiter::new(
            context.rate_limit.rate_limiter_duration(),
            context.rate_limit.rate_limiter_count,
        ),
        last_outcome: Ok(()),
    }));
    let mut in_flight = JoinSet::new();

    debug!(webhook = %context.name, uid = %context.uid, "Worker running");

    if context.test_mode {
        in_flight.spawn(deliver_test_event(context.clone(), snapshot.clone()));
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + context.interval, context.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(webhook) = updates.recv() => merge_snapshot(&snapshot, webhook),
            Some(_) = in_flight.join_next() => {}
            _ = ticker.tick(), if !context.test_mode => {
                match cycle.clone().try_lock_owned() {
                    Ok(guard) => {
                        in_flight.spawn(fetch_cycle(context.clone(), snapshot.clone(), guard));
                    }
                    Err(_) => {
                        debug!(webhook = %context.name, "Previous fetch still running, skipping tick");
                    }
                }
            }
        }
    }

    in_flight.shutdown().await;
    debug!(webhook = %context.name, uid = %context.uid, "Worker stopped");
}

/// Replace the snapshot, never moving the watermark backwards
fn merge_snapshot(snapshot: &Snapshot, mut incoming: SecurityEventWebhook) {
    let mut current = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
    if incoming.watermark() < current.watermark() {
        incoming.status = current.status.clone();
    }
    *current = incoming;
}

fn current(snapshot: &Snapshot) -> SecurityEventWebhook {
    snapshot
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Apply a status to the snapshot and hand it to the controller
async fn publish(
    context: &WorkerContext,
    snapshot: &Snapshot,
    outcome: &Result<(), String>,
    reason: HealthReason,
    at: DateTime<Utc>,
) {
    let webhook = {
        let mut current = snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(()) => current.set_health(true, reason, HEALTHY_MESSAGE, at),
            Err(message) => current.set_health(false, reason, message.clone(), at),
        }
        current.clone()
    };

    if context.status.send(webhook).await.is_err() {
        debug!(webhook = %context.name, "Controller gone, dropping status");
    }
}

async fn fetch_cycle(
    context: Arc<WorkerContext>,
    snapshot: Snapshot,
    mut cycle: OwnedMutexGuard<FetchCycle>,
) {
    let now = context.clock.now();
    let this_run = now.with_nanosecond(0).unwrap_or(now) - chrono::Duration::seconds(1);

    // The corrupted status is stamped at `now`, which becomes the new
    // watermark: fetching resumes from here and older events are skipped.
    let Some(previous_run) = current(&snapshot).watermark() else {
        warn!(webhook = %context.name, uid = %context.uid, "No watermark on webhook status");
        let outcome = Err(STATUS_CORRUPTED.to_string());
        publish(&context, &snapshot, &outcome, HealthReason::SecurityEventsProcessing, now).await;
        return;
    };

    if this_run <= previous_run {
        debug!(webhook = %context.name, "Fetch window is empty, skipping cycle");
        return;
    }

    let events = match context
        .fetcher
        .fetch(&context.query, previous_run, this_run)
        .await
    {
        Ok(events) => events,
        Err(e) => {
            warn!(
                webhook = %context.name,
                uid = %context.uid,
                from = %previous_run,
                to = %this_run,
                error = %e,
                "Fetching security events failed"
            );
            let outcome = Err(e.to_string());
            publish(&context, &snapshot, &outcome, HealthReason::SecurityEventsProcessing, previous_run).await;
            return;
        }
    };

    if events.is_empty() {
        let outcome = cycle.last_outcome.clone();
        publish(&context, &snapshot, &outcome, HealthReason::SecurityEventsProcessing, this_run).await;
        return;
    }

    let total = events.len();
    let labels = current(&snapshot).labels();
    let mut delivered = 0;
    let mut outcome = Ok(());

    for event in &events {
        if let Err(e) = cycle.limiter.event() {
            warn!(
                webhook = %context.name,
                dropped = total - delivered,
                error = %e,
                "Rate limit reached, dropping remaining events"
            );
            outcome = Err(e.to_string());
            break;
        }

        if let Err(e) = context
            .dispatcher
            .dispatch(&context.name, &context.config, &labels, event)
            .await
        {
            warn!(
                webhook = %context.name,
                event_id = %event.id,
                dropped = total - delivered,
                error = %e,
                "Event dispatch failed, dropping remaining events"
            );
            outcome = Err(e.to_string());
            break;
        }
        delivered += 1;
    }

    debug!(
        webhook = %context.name,
        fetched = total,
        delivered = delivered,
        to = %this_run,
        "Fetch cycle complete"
    );

    cycle.last_outcome = outcome.clone();
    publish(&context, &snapshot, &outcome, HealthReason::SecurityEventsProcessing, this_run).await;
}

/// Send one synthetic event and promote the webhook to `Enabled` on success
async fn deliver_test_event(context: Arc<WorkerContext>, snapshot: Snapshot) {
    let now = context.clock.now();
    let event = SecurityEvent::test_event(now);
    let labels = current(&snapshot).labels();

    let result = context
        .dispatcher
        .dispatch(&context.name, &context.config, &labels, &event)
        .await;

    let outcome = match result {
        Ok(()) => {
            info!(webhook = %context.name, "Test event delivered, enabling webhook");
            snapshot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .spec
                .state = WebhookState::Enabled;
            Ok(())
        }
        Err(e) => {
            warn!(webhook = %context.name, error = %e, "Test event delivery failed");
            Err(e.to_string())
        }
    };

    publish(&context, &snapshot, &outcome, HealthReason::TestEventDelivery, now).await;
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
