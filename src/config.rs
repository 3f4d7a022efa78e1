//! Client configuration.
//!
//! All tunables for the client live here: credentials, endpoint, default
//! zones, retry/backoff knobs, and the snapshot poll window. Components
//! derive their own views from this struct (e.g. `RetryPolicy`).

use serde::{Deserialize, Serialize};

use crate::error::{DragnetError, Result};

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.brightdata.com";

/// Environment variable holding the bearer token for [`ClientConfig::from_env`].
pub const API_TOKEN_ENV: &str = "DRAGNET_API_TOKEN";

/// Environment variable overriding the API base URL.
pub const API_BASE_ENV: &str = "DRAGNET_API_BASE";

/// Configuration for the scraper client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bearer token used on every request.
    pub api_token: String,

    /// Base URL of the remote service.
    pub api_base: String,

    /// Zone used for scrape requests when the caller does not name one.
    pub default_zone: String,

    /// Zone used for search requests when the caller does not name one.
    pub serp_zone: String,

    /// Timeout for each individual request attempt in milliseconds.
    /// Per-item timeouts override this.
    pub default_timeout_ms: u64,

    /// Maximum number of items dispatched concurrently in a batch.
    pub concurrency: usize,

    /// Maximum number of retry attempts before giving up.
    pub max_retries: u32,

    /// Base backoff duration in milliseconds (exponentially increased).
    pub backoff_ms: u64,

    /// Factor by which the backoff is increased with each retry.
    pub backoff_factor: f64,

    /// Maximum backoff time in milliseconds.
    pub max_backoff_ms: u64,

    /// Upper bound on the uniform random jitter added to each backoff delay,
    /// as a fraction of the computed delay.
    pub backoff_jitter: f64,

    /// Snapshot polling window.
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            default_zone: "web_unlocker1".to_string(),
            serp_zone: "serp_api1".to_string(),
            default_timeout_ms: 30_000,
            concurrency: 10,
            max_retries: 3,
            backoff_ms: 1000,
            backoff_factor: 1.5,
            max_backoff_ms: 30_000,
            backoff_jitter: 0.10,
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration with the given bearer token and defaults for
    /// everything else.
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from the environment.
    ///
    /// Reads the token from `DRAGNET_API_TOKEN` (required) and the base URL
    /// from `DRAGNET_API_BASE` (optional).
    pub fn from_env() -> Result<Self> {
        let api_token = std::env::var(API_TOKEN_ENV).map_err(|_| DragnetError::Validation {
            message: format!("{} is not set", API_TOKEN_ENV),
        })?;
        let mut config = Self::new(api_token);
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            config.api_base = base;
        }
        Ok(config)
    }
}

/// Polling window for asynchronous snapshot jobs.
///
/// The interval is drawn uniformly at random from `[min_interval_ms,
/// max_interval_ms]` on every cycle. A wide randomized window avoids both
/// quota burn from tight polling and thundering-herd status checks when
/// many clients watch jobs at once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Lower bound of the per-cycle poll delay in milliseconds.
    pub min_interval_ms: u64,

    /// Upper bound of the per-cycle poll delay in milliseconds.
    pub max_interval_ms: u64,

    /// Overall bound on how long to wait for a snapshot to become ready.
    /// `None` waits indefinitely (until canceled).
    pub max_wait_ms: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 10_000,
            max_interval_ms: 30_000,
            max_wait_ms: Some(600_000), // 10 minutes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("token");
        assert_eq!(config.api_token, "token");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_ms, 1000);
        assert!((config.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.concurrency, 10);
    }

    #[test]
    fn test_poll_window_defaults() {
        let poll = PollConfig::default();
        assert_eq!(poll.min_interval_ms, 10_000);
        assert_eq!(poll.max_interval_ms, 30_000);
        assert_eq!(poll.max_wait_ms, Some(600_000));
    }
}
