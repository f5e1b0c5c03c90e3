//! Wall-clock abstraction used for fetch watermarks.
//!
//! Workers stamp every fetch window with wall-clock time. Production code uses
//! [`SystemClock`]; [`TokioClock`] derives wall time from tokio's clock so that
//! tests running with paused time see watermarks advance together with the
//! worker's ticker.

use chrono::{DateTime, Utc};
use std::fmt;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that follows tokio's (possibly paused) time
///
/// The wall time is anchored when the clock is created and advances by the
/// elapsed [`tokio::time::Instant`] duration from then on.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor a new clock at the current moment
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor a new clock at an explicit wall time
    pub fn anchored_at(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().duration_since(self.anchor_instant);
        let elapsed = chrono::Duration::from_std(elapsed).unwrap_or_default();
        self.anchor_wall + elapsed
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
