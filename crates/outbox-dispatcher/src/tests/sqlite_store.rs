//! End-to-end cycles over SQLite.

use super::harness::{test_config, SqliteHarness, TRACEPARENT};
use crate::dispatcher::EntryOutcome;
use crate::metrics::MetricsSnapshot;
use outbox_database::{queries, Database, NewOutboxEntry, OutboxStatus};
use std::time::Duration;

/// The E1 walk-through: four failures, then the entry stays FAILED.
#[tokio::test]
async fn entry_fails_after_retry_limit() {
    let harness = SqliteHarness::new().await;
    let entry = harness
        .record(NewOutboxEntry::new("CREATE", r#"{"title":"X"}"#).with_traceparent(TRACEPARENT))
        .await;
    harness.publisher.fail_times(4, "broker unavailable");

    for _ in 0..4 {
        harness.dispatcher.run_cycle().await.unwrap();
    }

    let stored = harness.stored(&entry.id).await;
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.retry_count, 4);
    assert_eq!(harness.metrics.snapshot(), MetricsSnapshot { processed: 0, failed: 1 });

    let report = harness.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(harness.publisher.attempts(), 4);
}

/// Successful dispatch over SQLite, including status counts.
#[tokio::test]
async fn entries_processed_and_counted() {
    let harness = SqliteHarness::new().await;
    let a = harness.record(NewOutboxEntry::new("CREATE", r#"{"n":1}"#)).await;
    let b = harness.record(NewOutboxEntry::new("DELETE", r#"{"n":2}"#)).await;
    harness.publisher.fail_times(1, "hiccup");

    let report = harness.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.processed, 1);

    let stored_a = harness.stored(&a.id).await;
    assert_eq!(stored_a.status, OutboxStatus::Pending);
    assert_eq!(stored_a.last_error.as_deref(), Some("Publish error: hiccup"));
    assert_eq!(harness.stored(&b.id).await.status, OutboxStatus::Processed);

    harness.dispatcher.run_cycle().await.unwrap();
    let counts = harness
        .db
        .call(|conn| queries::count_by_status(conn))
        .await
        .unwrap();
    assert_eq!(counts.processed, 2);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 0);
}

/// A row finalized behind the dispatcher's back is not overwritten.
#[tokio::test]
async fn concurrent_finalization_is_not_overwritten() {
    let harness = SqliteHarness::new().await;
    let entry = harness.record(NewOutboxEntry::new("CREATE", "{}")).await;

    let fetched = harness.stored(&entry.id).await;
    let mut finalized = fetched.clone();
    finalized.status = OutboxStatus::Processed;
    harness
        .db
        .call(move |conn| queries::update_entry(conn, &finalized))
        .await
        .unwrap();

    // Stale copy: the dispatcher still believes it is PENDING.
    let outcome = harness.dispatcher.process_entry(fetched).await;
    assert!(matches!(
        outcome,
        crate::dispatcher::EntryOutcome::PersistFailed { .. }
    ));
    assert_eq!(harness.stored(&entry.id).await.status, OutboxStatus::Processed);
    assert_eq!(harness.metrics.snapshot(), MetricsSnapshot::default());
}

/// A save blocked by another writer fails inside the store budget, so the
/// reported outcome matches the row once the lock is released.
#[tokio::test]
async fn locked_save_outcome_matches_stored_row() {
    let config = crate::config::DispatcherConfig {
        store_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let harness = SqliteHarness::with_config(config).await;
    let entry = harness.record(NewOutboxEntry::new("CREATE", "{}")).await;
    let fetched = harness.stored(&entry.id).await;

    let producer = Database::open(&harness.path()).unwrap();
    producer.connection().execute_batch("BEGIN IMMEDIATE").unwrap();

    let outcome = harness.dispatcher.process_entry(fetched).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    producer.connection().execute_batch("COMMIT").unwrap();

    assert_eq!(
        outcome,
        EntryOutcome::PersistFailed {
            attempted: OutboxStatus::Pending
        }
    );
    assert_eq!(harness.publisher.published_count(), 1);

    let stored = harness.stored(&entry.id).await;
    assert_eq!(stored.status, OutboxStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(harness.metrics.snapshot(), MetricsSnapshot::default());

    // Picked up again once the producer is done.
    let report = harness.dispatcher.run_cycle().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(harness.stored(&entry.id).await.status, OutboxStatus::Processed);
    assert_eq!(harness.metrics.snapshot().processed, 1);
}
