//! The dispatch cycle.

use crate::config::DispatcherConfig;
use crate::envelope::Envelope;
use crate::error::{DispatchError, DispatchResult};
use crate::metrics::{MetricsSink, NullMetrics};
use crate::publisher::Publisher;
use crate::state::{self, Transition};
use crate::store::EntryStore;
use crate::trace::{DispatchSpan, TracePropagator, W3cTracePropagator};
use outbox_database::{OutboxEntry, OutboxStatus};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn, Instrument};

/// What happened to one entry during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Published and saved as PROCESSED.
    Processed,
    /// Attempt failed; saved as PENDING with the new retry count.
    Retrying { retry_count: u32 },
    /// Attempt failed past the retry limit; saved as FAILED.
    Failed { retry_count: u32 },
    /// The outcome could not be saved. The stored row still holds its
    /// pre-cycle state, so the entry is picked up again next cycle.
    PersistFailed { attempted: OutboxStatus },
    /// Row was already terminal when fetched and was left alone.
    Skipped,
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
    pub persist_errors: usize,
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Processed => self.processed += 1,
            EntryOutcome::Retrying { .. } => self.retried += 1,
            EntryOutcome::Failed { .. } => self.failed += 1,
            EntryOutcome::PersistFailed { .. } => self.persist_errors += 1,
            EntryOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Polls the entry store and publishes every pending entry.
///
/// Delivery is at-least-once: an entry whose publish succeeded but whose
/// save did not is published again on a later cycle.
pub struct Dispatcher {
    config: DispatcherConfig,
    store: Arc<dyn EntryStore>,
    publisher: Arc<dyn Publisher>,
    tracer: Arc<dyn TracePropagator>,
    metrics: Arc<dyn MetricsSink>,
    cycle_lock: Mutex<()>,
}

impl Dispatcher {
    /// Create a dispatcher with W3C trace propagation and no metrics.
    pub fn new(
        config: DispatcherConfig,
        store: Arc<dyn EntryStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
            tracer: Arc::new(W3cTracePropagator::new()),
            metrics: Arc::new(NullMetrics),
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn TracePropagator>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one dispatch cycle.
    ///
    /// Returns [`DispatchError::CycleInFlight`] without touching the store if
    /// another cycle is still running. A fetch failure aborts the cycle
    /// before any entry is mutated. Per-entry failures are contained and
    /// show up in the report.
    pub async fn run_cycle(&self) -> DispatchResult<CycleReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Dispatch cycle already in flight, skipping");
            return Err(DispatchError::CycleInFlight);
        };

        let entries = bounded(
            "fetch_pending",
            self.config.store_timeout,
            self.store.fetch_pending(),
        )
        .await
        .inspect_err(|e| error!(error = %e, "Failed to fetch pending entries"))?;

        let mut report = CycleReport {
            fetched: entries.len(),
            ..Default::default()
        };

        if entries.is_empty() {
            debug!("No pending entries");
            return Ok(report);
        }

        for entry in entries {
            let outcome = self.process_entry(entry).await;
            report.record(&outcome);
        }

        info!(
            fetched = report.fetched,
            processed = report.processed,
            retried = report.retried,
            failed = report.failed,
            persist_errors = report.persist_errors,
            "Dispatch cycle complete"
        );
        Ok(report)
    }

    /// Process one entry inside its own span.
    pub async fn process_entry(&self, entry: OutboxEntry) -> EntryOutcome {
        if !entry.is_pending() {
            warn!(
                entry_id = %entry.id,
                status = %entry.status,
                "Skipping entry that is already terminal"
            );
            return EntryOutcome::Skipped;
        }

        let parent = self.tracer.extract(entry.traceparent.as_deref());
        let span = self.tracer.start_span(&self.config.span_name, &entry, &parent);

        let outcome = self
            .dispatch_entry(entry, &span)
            .instrument(span.span().clone())
            .await;

        span.end();
        outcome
    }

    async fn dispatch_entry(&self, mut entry: OutboxEntry, span: &DispatchSpan) -> EntryOutcome {
        if let Err(e) = self.publish(&entry).await {
            warn!(
                entry_id = %entry.id,
                retry_count = entry.retry_count,
                error = %e,
                "Publish failed"
            );
            span.record_error(&e.to_string());
            return self.handle_failure(entry, e).await;
        }

        let before = entry.clone();
        state::mark_processed(&mut entry);

        match self.save(&entry).await {
            Ok(()) => {
                self.metrics.record_processed();
                info!(entry_id = %entry.id, action = %entry.action, "Entry processed");
                EntryOutcome::Processed
            }
            Err(e) => {
                // Already on the broker; counting it as a failed attempt
                // bounds how often it can be re-published.
                error!(
                    entry_id = %entry.id,
                    error = %e,
                    "Published but failed to save PROCESSED"
                );
                span.record_error(&e.to_string());
                self.handle_failure(before, e).await
            }
        }
    }

    async fn handle_failure(&self, mut entry: OutboxEntry, cause: DispatchError) -> EntryOutcome {
        let transition = state::record_failure(&mut entry, self.config.retry_limit, cause.to_string());

        if let Err(e) = self.save(&entry).await {
            error!(
                entry_id = %entry.id,
                attempted_status = %entry.status,
                retry_count = entry.retry_count,
                error = %e,
                "Failed to save retry bookkeeping"
            );
            return EntryOutcome::PersistFailed {
                attempted: entry.status,
            };
        }

        match transition {
            Transition::Exhausted { retry_count } => {
                self.metrics.record_failed();
                error!(
                    entry_id = %entry.id,
                    retry_count,
                    retry_limit = self.config.retry_limit,
                    "Entry failed permanently"
                );
                EntryOutcome::Failed { retry_count }
            }
            Transition::Retry { retry_count } => {
                info!(entry_id = %entry.id, retry_count, "Entry will be retried");
                EntryOutcome::Retrying { retry_count }
            }
            Transition::Processed => EntryOutcome::Processed,
        }
    }

    async fn publish(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let body = Envelope::build(entry)?.to_bytes()?;
        bounded(
            "publish",
            self.config.publish_timeout,
            self.publisher.publish(&self.config.destination, &body),
        )
        .await
    }

    async fn save(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        match bounded("save", self.config.store_timeout, self.store.save(entry)).await {
            Err(e @ DispatchError::Timeout { .. }) => self.reconcile_timed_out_save(entry, e).await,
            other => other,
        }
    }

    /// A save the dispatcher stopped waiting for may still land. Read the row
    /// back so the outcome and the counters follow what was stored.
    async fn reconcile_timed_out_save(
        &self,
        entry: &OutboxEntry,
        timeout: DispatchError,
    ) -> DispatchResult<()> {
        let stored = bounded("load", self.config.store_timeout, self.store.load(&entry.id)).await;
        match stored {
            Ok(Some(row)) if row.status == entry.status && row.retry_count == entry.retry_count => {
                warn!(
                    entry_id = %entry.id,
                    status = %row.status,
                    "Save timed out but was applied"
                );
                Ok(())
            }
            Ok(_) => Err(timeout),
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Could not read back timed out save");
                Err(timeout)
            }
        }
    }
}

/// Run a collaborator call under a time budget.
async fn bounded<T, F>(operation: &'static str, limit: Duration, call: F) -> DispatchResult<T>
where
    F: Future<Output = DispatchResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout {
            operation,
            after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
