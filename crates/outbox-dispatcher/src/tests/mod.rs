//! Integration tests for the outbox dispatcher.
//!
//! - `harness.rs`          - Dispatcher wired to in-memory or SQLite stores
//! - `state_machine.rs`    - Retry counting and terminal transitions
//! - `isolation.rs`        - Per-entry failure containment
//! - `single_flight.rs`    - Overlapping cycle triggers
//! - `timeouts.rs`         - Collaborator time budgets
//! - `trace_propagation.rs` - Trace context carried from producer to broker
//! - `sqlite_store.rs`     - End-to-end cycles over SQLite

mod sqlite_store;
