// Change feed configuration
//
// Tunables for the subscription registry, catch-up reads and retries,
// loaded from environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::RetryPolicy;

/// Default bound on events queued for one live subscriber
pub const DEFAULT_BACKLOG_LIMIT: usize = 500;

/// Default page size for catch-up reads
pub const DEFAULT_READ_BATCH_SIZE: usize = 100;

/// Configuration for the change feed core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangefeedConfig {
    /// Events queued per subscription before it is invalidated
    pub backlog_limit: usize,

    /// Page size for catch-up reads from the event log
    pub read_batch_size: usize,

    /// Retry policy for transient storage failures
    pub retry: RetryPolicy,
}

impl Default for ChangefeedConfig {
    fn default() -> Self {
        Self {
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl ChangefeedConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `CHANGEFEED_BACKLOG_LIMIT`: per-subscription backlog bound (default: 500)
    /// - `CHANGEFEED_READ_BATCH_SIZE`: catch-up page size (default: 100)
    /// - `CHANGEFEED_RETRY_MAX_ATTEMPTS`: attempts including the first (default: 5)
    /// - `CHANGEFEED_RETRY_INITIAL_MS`: first retry delay (default: 100)
    /// - `CHANGEFEED_RETRY_MAX_MS`: retry delay cap (default: 5000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut retry = defaults.retry;
        if let Some(attempts) = parse_env("CHANGEFEED_RETRY_MAX_ATTEMPTS") {
            retry = retry.with_max_attempts(attempts);
        }
        if let Some(ms) = parse_env("CHANGEFEED_RETRY_INITIAL_MS") {
            retry = retry.with_initial_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_env("CHANGEFEED_RETRY_MAX_MS") {
            retry = retry.with_max_interval(Duration::from_millis(ms));
        }

        Self {
            backlog_limit: parse_env("CHANGEFEED_BACKLOG_LIMIT")
                .unwrap_or(defaults.backlog_limit),
            read_batch_size: parse_env("CHANGEFEED_READ_BATCH_SIZE")
                .unwrap_or(defaults.read_batch_size),
            retry,
        }
        .normalized()
    }

    /// Set the per-subscription backlog bound
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self.normalized()
    }

    /// Set the catch-up page size
    pub fn with_read_batch_size(mut self, size: usize) -> Self {
        self.read_batch_size = size;
        self.normalized()
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // Queues and pages need room for at least one event
    fn normalized(mut self) -> Self {
        self.backlog_limit = self.backlog_limit.max(1);
        self.read_batch_size = self.read_batch_size.max(1);
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
