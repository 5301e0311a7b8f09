//! Classification of chunk-transfer outcomes and the per-chunk retry budget.
//!
//! Backoff is a fixed delay between attempts, not exponential.

use std::time::Duration;

/// Statuses worth retrying: request timeout and gateway-class failures.
const TRANSIENT_STATUSES: [u16; 4] = [408, 502, 503, 504];

/// Default number of retries per chunk.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Whether a failure may go away on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

/// Classifies an HTTP status; `None` for 2xx.
pub fn classify_status(status: u16) -> Option<FailureClass> {
    if (200..300).contains(&status) {
        None
    } else if TRANSIENT_STATUSES.contains(&status) {
        Some(FailureClass::Transient)
    } else {
        Some(FailureClass::Permanent)
    }
}

/// What the session should do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then re-send the same chunk.
    Retry { delay: Duration, retries_left: u32 },
    /// Stop the session.
    GiveUp { class: FailureClass },
}

/// Fixed-delay retry budget per chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decides the next step after a failed attempt of class `class`,
    /// given `retries_used` retries already spent on the current chunk.
    ///
    /// With a budget of N, the first N transient failures retry and the
    /// next one gives up.
    pub fn decide(&self, class: FailureClass, retries_used: u32) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp {
                class: FailureClass::Permanent,
            },
            FailureClass::Transient if retries_used < self.max_retries => RetryDecision::Retry {
                delay: self.delay,
                retries_left: self.max_retries - retries_used - 1,
            },
            FailureClass::Transient => RetryDecision::GiveUp {
                class: FailureClass::Transient,
            },
        }
    }
}
