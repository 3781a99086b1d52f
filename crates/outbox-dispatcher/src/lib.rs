//! Outbox dispatcher: moves recorded domain events from the outbox table to
//! a message broker.
//!
//! Producers write an entry in the same transaction as their business change
//! (see `outbox_database`). The dispatcher polls PENDING entries, publishes
//! each one and records the outcome.
//!
//! # Core Invariants
//!
//! 1. **At-least-once**: publish and save are not atomic; a crash between them re-publishes
//! 2. **Bounded retries**: an entry fails permanently once `retry_count > retry_limit`
//! 3. **Terminal is final**: PROCESSED and FAILED rows are never fetched or written again
//! 4. **Single-flight**: at most one cycle runs at a time; overlapping triggers are skipped
//! 5. **Contained failures**: one entry's failure never affects its siblings
//!
//! # Architecture
//!
//! ```text
//! Scheduler --tick--> Dispatcher --fetch/save--> EntryStore (SQLite)
//!                        |  \
//!                        |   +--extract/span--> TracePropagator
//!                        +--publish-----------> Publisher (Redis / HTTP)
//! ```

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod http_publisher;
pub mod metrics;
pub mod publisher;
pub mod redis_publisher;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod trace;

#[cfg(test)]
mod tests;

pub use config::DispatcherConfig;
pub use dispatcher::{CycleReport, Dispatcher, EntryOutcome};
pub use envelope::Envelope;
pub use error::{DispatchError, DispatchResult};
pub use http_publisher::{HttpPublisher, HttpPublisherConfig};
pub use metrics::{DispatchMetrics, MetricsSink, MetricsSnapshot, NullMetrics};
pub use publisher::{LogPublisher, PublishBehavior, PublishedMessage, Publisher, RecordingPublisher};
pub use redis_publisher::RedisStreamPublisher;
pub use scheduler::Scheduler;
pub use store::{EntryStore, InMemoryEntryStore, SqliteEntryStore};
pub use trace::{DispatchSpan, NoopTracePropagator, TracePropagator, W3cTracePropagator};
