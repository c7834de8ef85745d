//! Retry decisions for failed activity attempts.
//!
//! Exponential backoff capped at `max_backoff`. Validation errors are never
//! retried, whatever the configured set of non-retryable kinds says.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, WorkflowError};

/// Default cap on the delay between two attempts (5 min)
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Default delay before the first retry
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Retry policy for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try), at least 1
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any delay
    pub max_backoff: Duration,

    /// Backoff multiplier (delay *= multiplier after each retry)
    pub backoff_multiplier: f64,

    /// Error kinds that end the step on first occurrence
    pub non_retryable_error_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_attempts(1)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp { reason: String },
}

impl RetryPolicy {
    /// Policy with default backoff and the standard non-retryable kinds
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: 2.0,
            non_retryable_error_kinds: [
                ErrorKind::Validation,
                ErrorKind::PermanentExternal,
                ErrorKind::Configuration,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }

    /// Calculate delay after a specific failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_backoff.min(self.max_backoff);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let capped = delay.min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Decide what follows failed attempt number `attempt` (1-indexed)
    pub fn decide(&self, attempt: u32, error: &WorkflowError) -> RetryDecision {
        let kind = error.kind();

        if kind == ErrorKind::Validation || self.non_retryable_error_kinds.contains(&kind) {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable {} error: {}", kind, error.message()),
            };
        }

        if !self.should_retry(attempt) {
            return RetryDecision::GiveUp {
                reason: format!(
                    "gave up after {} attempt(s): {}",
                    attempt,
                    error.message()
                ),
            };
        }

        RetryDecision::Retry {
            after: self.delay_for_attempt(attempt),
        }
    }
}
