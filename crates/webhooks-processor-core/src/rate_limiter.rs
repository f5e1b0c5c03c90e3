//! Sliding-window admission gate for event dispatch.
//!
//! Each worker owns one limiter built from its provider's policy. A rejected
//! attempt is not recorded, so a burst can never be admitted later.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Rejection returned once the window is full
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded: at most {count} events per {duration:?}")]
pub struct RateLimitError {
    pub count: usize,
    pub duration: Duration,
}

/// Allows at most `count` events in any trailing window of `duration`
#[derive(Debug)]
pub struct RateLimiter {
    duration: Duration,
    count: usize,
    admitted: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(duration: Duration, count: usize) -> Self {
        Self {
            duration,
            count,
            admitted: VecDeque::with_capacity(count.min(1024)),
        }
    }

    /// Record one admission attempt
    pub fn event(&mut self) -> Result<(), RateLimitError> {
        let now = Instant::now();

        while let Some(oldest) = self.admitted.front() {
            if now.duration_since(*oldest) >= self.duration {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        if self.admitted.len() >= self.count {
            return Err(RateLimitError {
                count: self.count,
                duration: self.duration,
            });
        }

        self.admitted.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
#[path = "rate_limiter_tests.rs"]
mod tests;
