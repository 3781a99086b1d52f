//! SQLite persistence layer for transactional outbox entries.
//!
//! This crate provides:
//! - The `outbox` table schema and its migrations
//! - Model types (`OutboxEntry`, `OutboxStatus`, `NewOutboxEntry`)
//! - Standalone query helpers that work with any `&Connection`
//! - A synchronous `Database` wrapper for producers and tooling
//! - An async executor (`AsyncDatabase`) with a dedicated SQLite thread
//!
//! # Recording entries
//!
//! Producers record an entry in the same transaction as the business change
//! that produced it. Every query helper takes a `&Connection`, and a
//! `rusqlite::Transaction` derefs to one:
//!
//! ```ignore
//! let tx = conn.transaction()?;
//! tx.execute("UPDATE movies SET title = ?1 WHERE id = ?2", params![title, id])?;
//! queries::insert_entry(&tx, &NewOutboxEntry::new("UPDATE", movie_json))?;
//! tx.commit()?;
//! ```
//!
//! # Dispatch
//!
//! The dispatcher only ever reads `PENDING` rows and writes back one row at a
//! time through [`queries::update_entry`], which refuses to touch rows that
//! already reached a terminal status.

mod db;
mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;
