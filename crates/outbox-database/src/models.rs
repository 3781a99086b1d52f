//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outbox entry status.
///
/// `Pending` is the only state the dispatcher ever re-reads. `Processed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl Default for OutboxStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the stored text form. Case-insensitive; unknown text yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbox entry - one recorded domain event awaiting (or done with) publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    /// Serialized event body. Opaque to the dispatcher.
    pub payload: String,
    /// Event type name, forwarded verbatim to the broker.
    pub action: String,
    pub status: OutboxStatus,
    /// W3C `traceparent` of the producer, if it was traced.
    pub traceparent: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }
}

/// New outbox entry for insertion.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub id: String,
    pub action: String,
    pub payload: String,
    pub traceparent: Option<String>,
}

impl NewOutboxEntry {
    /// Create a new entry with a fresh UUID v4 identifier.
    pub fn new(action: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action: action.into(),
            payload: payload.into(),
            traceparent: None,
        }
    }

    /// Attach the producer's trace context.
    pub fn with_traceparent(mut self, traceparent: impl Into<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self
    }

    /// Materialize the row as it looks right after insertion.
    pub fn into_entry(self, now: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry {
            id: self.id,
            payload: self.payload,
            action: self.action,
            status: OutboxStatus::Pending,
            traceparent: self.traceparent,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_status_parse() {
        assert_eq!(OutboxStatus::parse("PENDING"), Some(OutboxStatus::Pending));
        assert_eq!(OutboxStatus::parse("pending"), Some(OutboxStatus::Pending));
        assert_eq!(OutboxStatus::parse("Processed"), Some(OutboxStatus::Processed));
        assert_eq!(OutboxStatus::parse("FAILED"), Some(OutboxStatus::Failed));
        assert_eq!(OutboxStatus::parse("sent"), None);
        assert_eq!(OutboxStatus::parse(""), None);
    }

    #[test]
    fn test_outbox_status_as_str() {
        assert_eq!(OutboxStatus::Pending.as_str(), "PENDING");
        assert_eq!(OutboxStatus::Processed.as_str(), "PROCESSED");
        assert_eq!(OutboxStatus::Failed.as_str(), "FAILED");
        assert_eq!(OutboxStatus::Failed.to_string(), "FAILED");
    }

    #[test]
    fn test_outbox_status_terminal() {
        assert!(!OutboxStatus::Pending.is_terminal());
        assert!(OutboxStatus::Processed.is_terminal());
        assert!(OutboxStatus::Failed.is_terminal());
        assert_eq!(OutboxStatus::default(), OutboxStatus::Pending);
    }

    #[test]
    fn test_new_entry_into_entry() {
        let now = Utc::now();
        let entry = NewOutboxEntry::new("CREATE", r#"{"title":"X"}"#)
            .with_traceparent("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
            .into_entry(now);

        assert!(entry.is_pending());
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.action, "CREATE");
        assert_eq!(entry.created_at, now);
        assert!(uuid::Uuid::parse_str(&entry.id).is_ok());
        assert!(entry.traceparent.is_some());
    }
}
