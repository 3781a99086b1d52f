//! Per-entry status transitions.
//!
//! ```text
//! PENDING --publish ok--------------------------> PROCESSED
//! PENDING --publish failed, retry_count <= limit-> PENDING (retry_count + 1)
//! PENDING --publish failed, retry_count > limit--> FAILED
//! ```
//!
//! Only PENDING entries may be transitioned. The functions here mutate the
//! in-memory entry; persisting it is the caller's job.

use outbox_database::{OutboxEntry, OutboxStatus};

/// Result of applying one attempt to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Processed,
    /// Still PENDING, retried next cycle.
    Retry { retry_count: u32 },
    /// Moved to FAILED.
    Exhausted { retry_count: u32 },
}

/// Mark a successful publish.
pub fn mark_processed(entry: &mut OutboxEntry) -> Transition {
    debug_assert!(entry.is_pending(), "terminal entries are never re-dispatched");
    entry.status = OutboxStatus::Processed;
    Transition::Processed
}

/// Count one failed attempt and decide whether the entry is exhausted.
pub fn record_failure(entry: &mut OutboxEntry, retry_limit: u32, error: impl Into<String>) -> Transition {
    debug_assert!(entry.is_pending(), "terminal entries are never re-dispatched");
    entry.retry_count = entry.retry_count.saturating_add(1);
    entry.last_error = Some(error.into());

    if entry.retry_count > retry_limit {
        entry.status = OutboxStatus::Failed;
        Transition::Exhausted {
            retry_count: entry.retry_count,
        }
    } else {
        Transition::Retry {
            retry_count: entry.retry_count,
        }
    }
}
