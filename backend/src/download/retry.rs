//! Retry decisions with capped exponential backoff

use crate::config::RetryConfig;
use crate::error::TransferError;
use std::time::Duration;

/// Whether retrying a failed transfer could help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Terminal,
}

impl FailureClass {
    pub fn of(error: &TransferError) -> Self {
        match error {
            TransferError::Transient(_) => Self::Transient,
            TransferError::Terminal(_) | TransferError::Storage(_) => Self::Terminal,
        }
    }
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after waiting `delay`
    Retry { delay: Duration },
    /// Move the item to Failed
    Fail,
}

/// Stateless retry policy: `base * 2^retry_count`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// Decide what happens after a failed attempt.
    ///
    /// `retry_count` is the number of retries already spent on the item.
    pub fn decide(&self, class: FailureClass, retry_count: u32, max_attempts: u32) -> RetryDecision {
        match class {
            FailureClass::Terminal => RetryDecision::Fail,
            FailureClass::Transient if retry_count >= max_attempts => RetryDecision::Fail,
            FailureClass::Transient => RetryDecision::Retry {
                delay: self.delay_for(retry_count),
            },
        }
    }

    /// Backoff before retry number `retry_count + 1`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        // 2^20 already exceeds any sensible ceiling
        let factor = 1u32 << retry_count.min(20);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Map an HTTP status to a transfer error.
///
/// 408, 429 and 5xx are worth retrying; every other 4xx is not.
pub fn classify_status(status: u16, message: impl Into<String>) -> TransferError {
    let message = message.into();
    match status {
        408 | 429 | 500..=599 => TransferError::Transient(message),
        _ => TransferError::Terminal(message),
    }
}
