use std::time::Duration;

/// How to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Fixed-delay retry policy.
///
/// `max_retries` counts retries, not attempts: a sequence makes at most
/// `max_retries + 1` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Decide after `attempts` calls have been made, the last of which failed.
    pub fn decide(&self, attempts: u32, retryable: bool) -> Decision {
        if retryable && attempts < self.max_attempts() {
            Decision::Retry { delay: self.delay }
        } else {
            Decision::Fail
        }
    }
}
