//! Error types for the outbox dispatcher.

use thiserror::Error;

/// Dispatcher error type.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Entry store error (fetch or save)
    #[error("Database error: {0}")]
    Database(#[from] outbox_database::DatabaseError),

    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Envelope serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broker accepted the connection but rejected the message
    #[error("Publish error: {0}")]
    Publish(String),

    /// A collaborator call exceeded its time budget
    #[error("Timeout: {operation} did not complete within {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another dispatch cycle is still running
    #[error("A dispatch cycle is already in flight")]
    CycleInFlight,
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
