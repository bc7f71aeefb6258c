//! # Retry Configuration
//!
//! Immutable, per-call description of how hard the resilient client should
//! try: how many retries, how long to wait between them, and which failures
//! are worth retrying at all.
//!
//! Backoff is deterministic exponential growth with a hard ceiling:
//! `delay(n) = min(base_delay * backoff_factor^n, max_delay)`, at millisecond
//! resolution. There is no jitter.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest_retry::{default_on_request_failure, default_on_request_success, Retryable};

use super::classify::NetworkError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Upper bound accepted by [`RetryConfig::validate`].
pub const MAX_ALLOWED_RETRIES: u32 = 10;

/// What went wrong with one attempt, as seen by a retry predicate.
#[derive(Debug)]
pub enum AttemptFailure<'a> {
    /// The HTTP stack failed before a response arrived, or while its body
    /// was being read.
    Transport(&'a reqwest_middleware::Error),
    /// The attempt hit its per-attempt timeout, headers or body.
    Timeout,
    /// A response arrived with a non-2xx status.
    Status(&'a reqwest::Response),
}

/// Predicate deciding whether a failed attempt should be retried.
pub type RetryCondition = Arc<dyn Fn(&AttemptFailure<'_>) -> bool + Send + Sync>;

/// Default policy: retry transient transport failures (as judged by
/// `reqwest-retry`), every timeout, 5xx, 408 and 429.
pub fn default_retry_condition(failure: &AttemptFailure<'_>) -> bool {
    match failure {
        AttemptFailure::Transport(err) => {
            matches!(default_on_request_failure(err), Some(Retryable::Transient))
        }
        AttemptFailure::Timeout => true,
        AttemptFailure::Status(response) => {
            matches!(default_on_request_success(response), Some(Retryable::Transient))
        }
    }
}

/// Retry settings for one logical request.
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
    /// Which failures are retried.
    pub retry_condition: RetryCondition,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            retry_condition: Arc::new(default_retry_condition),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// More attempts with shorter delays, for cheap idempotent reads.
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4_000),
            ..Self::default()
        }
    }

    /// Set the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first-retry delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the per-attempt multiplier.
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Replace the retry predicate.
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&AttemptFailure<'_>) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Reject configurations that would make backoff shrink, overflow or run
    /// away, before any network call is made.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(NetworkError::validation(format!(
                "backoff factor must be a finite number >= 1, got {}",
                self.backoff_factor
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(NetworkError::validation(format!(
                "base delay ({:?}) exceeds max delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }
        if self.max_retries > MAX_ALLOWED_RETRIES {
            return Err(NetworkError::validation(format!(
                "max retries must be at most {MAX_ALLOWED_RETRIES}, got {}",
                self.max_retries
            )));
        }
        Ok(())
    }

    /// Delay to sleep after failed attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let grown = base_ms * self.backoff_factor.powi(exponent);

        if !grown.is_finite() || grown >= max_ms {
            return self.max_delay;
        }
        Duration::from_millis(grown.max(0.0).round() as u64)
    }

    /// Whether `failure` on attempt `attempt` should lead to another attempt.
    pub fn should_retry(&self, attempt: u32, failure: &AttemptFailure<'_>) -> bool {
        attempt < self.max_retries && (self.retry_condition)(failure)
    }
}
