//! Retry policy: backoff decisions for failed attempts.
//!
//! Given the classification of a failed attempt and the current attempt
//! number, the policy answers one question: stop and surface the failure,
//! or retry after a delay. The delay grows exponentially with the attempt
//! number and carries uniform random jitter so concurrent items do not
//! synchronize into retry storms.

use std::time::Duration;

use metrics::counter;
use rand::Rng;

use crate::config::ClientConfig;
use crate::dispatch::AttemptFailure;

/// Decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop and surface the outcome to the caller.
    Stop,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial one.
    pub max_retries: u32,
    /// Base backoff duration in milliseconds.
    pub backoff_ms: u64,
    /// Factor by which the backoff grows with each attempt.
    pub backoff_factor: f64,
    /// Cap on the computed backoff in milliseconds.
    pub max_backoff_ms: u64,
    /// Upper bound of the uniform jitter, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1000,
            backoff_factor: 1.5,
            max_backoff_ms: 30_000,
            jitter: 0.10,
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
            backoff_factor: config.backoff_factor,
            max_backoff_ms: config.max_backoff_ms,
            jitter: config.backoff_jitter,
        }
    }
}

impl RetryPolicy {
    /// Decide whether a failed attempt should be retried.
    ///
    /// `attempt` is zero-based: the initial attempt is 0, so with
    /// `max_retries = 3` a persistently failing item makes 4 attempts total.
    /// Non-retryable classifications stop immediately regardless of attempts
    /// remaining - they are configuration or input errors, and retrying
    /// wastes quota.
    pub fn decide(&self, failure: &AttemptFailure, attempt: u32) -> RetryDecision {
        if !failure.is_retryable() {
            counter!(
                "dragnet_retry_denied_total",
                "reason" => "non_retryable",
                "kind" => failure.kind()
            )
            .increment(1);
            return RetryDecision::Stop;
        }

        if attempt >= self.max_retries {
            counter!(
                "dragnet_retry_denied_total",
                "reason" => "max_retries",
                "kind" => failure.kind()
            )
            .increment(1);
            tracing::debug!(
                attempt,
                max_retries = self.max_retries,
                "No retries remaining, surfacing failure"
            );
            return RetryDecision::Stop;
        }

        counter!("dragnet_retries_total", "kind" => failure.kind()).increment(1);
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }

    /// Backoff delay for the given attempt number.
    ///
    /// `backoff_ms * backoff_factor^attempt`, capped at `max_backoff_ms`,
    /// plus uniform random jitter in `[0, jitter * delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = (self.backoff_ms as f64) * self.backoff_factor.powi(attempt as i32);
        let capped = exponential.min(self.max_backoff_ms as f64);
        let jittered = capped * (1.0 + self.jitter * rand::rng().random::<f64>());
        Duration::from_millis(jittered as u64)
    }
}
