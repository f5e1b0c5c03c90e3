//! # In-Memory Event Source
//!
//! [`EventFetcher`] over a list of events held in memory. Every fetch window
//! is recorded so tests can check how the windows line up.

use crate::event::SecurityEvent;
use crate::fetcher::{EventFetcher, FetchError};
use crate::query::Query;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Window of a single fetch call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    events: Vec<SecurityEvent>,
    windows: Vec<FetchWindow>,
    failures_remaining: usize,
    delay: Duration,
}

/// Event source backed by a vector
#[derive(Clone, Default)]
pub struct InMemoryEventSource {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryEventSource {
    /// Create new empty source
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add events to the source
    pub fn push(&self, events: impl IntoIterator<Item = SecurityEvent>) {
        self.lock().events.extend(events);
    }

    /// Fail the next `count` fetches
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Hold every fetch for `delay` (tokio time) before it returns
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    /// Every window requested so far, oldest first
    pub fn windows(&self) -> Vec<FetchWindow> {
        self.lock().windows.clone()
    }

    /// Number of fetch calls so far
    pub fn fetch_count(&self) -> usize {
        self.lock().windows.len()
    }
}

#[async_trait]
impl EventFetcher for InMemoryEventSource {
    async fn fetch(
        &self,
        query: &Query,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SecurityEvent>, FetchError> {
        let (result, delay) = {
            let mut inner = self.lock();
            inner.windows.push(FetchWindow { from, to });

            let result = if inner.failures_remaining > 0 {
                inner.failures_remaining -= 1;
                Err(FetchError::Request {
                    message: "event store unavailable".to_string(),
                })
            } else {
                Ok(inner
                    .events
                    .iter()
                    .filter(|event| from <= event.time && event.time < to && query.matches(event))
                    .cloned()
                    .collect())
            };
            (result, inner.delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
