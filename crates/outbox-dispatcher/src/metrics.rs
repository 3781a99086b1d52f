//! Dispatch counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Counter name for entries that reached PROCESSED.
pub const PROCESSED_COUNTER: &str = "outbox.events.processed";

/// Counter name for entries that reached FAILED.
pub const FAILED_COUNTER: &str = "outbox.events.failed";

/// Sink for dispatch outcome counters.
///
/// Both counters are monotonic. They are bumped only after the outcome has
/// been saved.
pub trait MetricsSink: Send + Sync {
    fn record_processed(&self);
    fn record_failed(&self);
}

/// Point-in-time view of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
}

/// In-process atomic counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for DispatchMetrics {
    fn record_processed(&self) {
        let value = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(counter = PROCESSED_COUNTER, value, "Counter incremented");
    }

    fn record_failed(&self) {
        let value = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(counter = FAILED_COUNTER, value, "Counter incremented");
    }
}

/// Discards every increment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn record_processed(&self) {}
    fn record_failed(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_are_independent() {
        let metrics = DispatchMetrics::new();
        metrics.record_processed();
        metrics.record_processed();
        metrics.record_failed();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                processed: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn test_shared_through_trait_object() {
        let metrics = Arc::new(DispatchMetrics::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        sink.record_processed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().processed, 400);
        assert_eq!(metrics.snapshot().failed, 0);
    }
}
