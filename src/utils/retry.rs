//! Bounded fixed-delay retry, shared by page loads, toggle clicks, scrape
//! retries and image downloads.

use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::{Action, Condition, Retry, RetryIf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_millis(max_attempts: u32, delay_ms: u64) -> Self {
        Self::new(max_attempts, Duration::from_millis(delay_ms))
    }

    /// Delays slept between attempts; one fewer than `max_attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        FixedInterval::new(self.delay).take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Retry `action` on every error until attempts run out.
    pub async fn run<A: Action>(&self, action: A) -> Result<A::Item, A::Error> {
        Retry::start(self.delays(), action).await
    }

    /// Retry `action` only while `condition` accepts the error.
    pub async fn run_if<A, C>(&self, action: A, condition: C) -> Result<A::Item, A::Error>
    where
        A: Action,
        C: Condition<A::Error>,
    {
        RetryIf::start(self.delays(), action, condition).await
    }
}
