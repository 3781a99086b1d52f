//! Configuration for the outbox dispatcher.

use crate::error::{DispatchError, DispatchResult};
use std::time::Duration;

/// Queue used when no destination is configured.
pub const DEFAULT_DESTINATION: &str = "outboxQueue";

/// Span name for per-entry processing.
pub const DEFAULT_SPAN_NAME: &str = "OutboxProcessing";

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Failed attempts tolerated before an entry is marked FAILED.
    /// An entry fails once `retry_count > retry_limit`.
    pub retry_limit: u32,

    /// Delay between the starts of two dispatch cycles
    pub poll_interval: Duration,

    /// Broker destination every entry is published to
    pub destination: String,

    /// Upper bound for a single publish call
    pub publish_timeout: Duration,

    /// Upper bound for a single fetch or save call
    pub store_timeout: Duration,

    /// Name given to the per-entry span
    pub span_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            poll_interval: Duration::from_millis(5000),
            destination: DEFAULT_DESTINATION.to_string(),
            publish_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
            span_name: DEFAULT_SPAN_NAME.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Build a config from `OUTBOX_*` environment variables.
    ///
    /// Missing or unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let retry_limit = lookup("OUTBOX_RETRY_LIMIT")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(defaults.retry_limit);

        let destination = lookup("OUTBOX_DESTINATION")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.destination);

        Self {
            retry_limit,
            poll_interval: number("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            destination,
            publish_timeout: number("OUTBOX_PUBLISH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.publish_timeout),
            store_timeout: number("OUTBOX_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            span_name: defaults.span_name,
        }
    }

    /// Reject settings the scheduler or dispatcher cannot run with.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.destination.trim().is_empty() {
            return Err(DispatchError::Config("destination must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(DispatchError::Config("poll interval must be positive".to_string()));
        }
        if self.publish_timeout.is_zero() || self.store_timeout.is_zero() {
            return Err(DispatchError::Config("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    /// How long a store statement may wait on a lock held by another writer.
    ///
    /// Half the store budget: a contended save must fail before the
    /// dispatcher stops waiting for it.
    pub fn lock_wait(&self) -> Duration {
        self.store_timeout / 2
    }
}
