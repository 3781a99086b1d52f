//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so the same
//! helpers serve the sync [`Database`](crate::Database), the async executor,
//! and a producer's own `rusqlite::Transaction`.

use crate::{DatabaseError, DatabaseResult, NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tracing::debug;

const ENTRY_COLUMNS: &str =
    "id, payload, action, status, traceparent, retry_count, last_error, created_at, updated_at";

/// Insert a new pending entry.
pub fn insert_entry(conn: &Connection, entry: &NewOutboxEntry) -> DatabaseResult<OutboxEntry> {
    let now = Utc::now();
    let now_str = format_datetime(&now);
    conn.execute(
        "INSERT INTO outbox (id, payload, action, status, traceparent, retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
        params![
            entry.id,
            entry.payload,
            entry.action,
            OutboxStatus::Pending.as_str(),
            entry.traceparent,
            now_str,
        ],
    )?;
    debug!(entry_id = %entry.id, action = %entry.action, "Recorded outbox entry");
    Ok(entry.clone().into_entry(now))
}

/// Get an entry by ID.
pub fn get_entry(conn: &Connection, id: &str) -> DatabaseResult<Option<OutboxEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM outbox WHERE id = ?1");
    let mut stmt = conn.prepare_cached(&sql)?;

    let result = stmt.query_row(params![id], EntryRow::from_row);

    match result {
        Ok(row) => Ok(Some(row.into_entry()?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List pending entries in insertion order.
pub fn list_pending(conn: &Connection, limit: Option<usize>) -> DatabaseResult<Vec<OutboxEntry>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM outbox
         WHERE status = ?1
         ORDER BY created_at ASC, rowid ASC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let rows = stmt
        .query_map(params![OutboxStatus::Pending.as_str(), limit], EntryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(EntryRow::into_entry).collect()
}

/// Persist the mutable state of one entry.
///
/// The update only applies while the stored row is still `PENDING` and its
/// stored retry count does not exceed the new one. Anything else is reported
/// as [`DatabaseError::Conflict`] and leaves the row untouched.
pub fn update_entry(conn: &Connection, entry: &OutboxEntry) -> DatabaseResult<()> {
    let now = format_datetime(&Utc::now());
    let count = conn.execute(
        "UPDATE outbox
         SET status = ?1, retry_count = ?2, last_error = ?3, updated_at = ?4
         WHERE id = ?5 AND status = ?6 AND retry_count <= ?2",
        params![
            entry.status.as_str(),
            entry.retry_count,
            entry.last_error,
            now,
            entry.id,
            OutboxStatus::Pending.as_str(),
        ],
    )?;

    if count == 0 {
        return match get_entry(conn, &entry.id)? {
            None => Err(DatabaseError::NotFound(format!("outbox entry {}", entry.id))),
            Some(stored) => Err(DatabaseError::Conflict(format!(
                "outbox entry {} is {} with retry_count {}",
                stored.id, stored.status, stored.retry_count
            ))),
        };
    }

    debug!(
        entry_id = %entry.id,
        status = %entry.status,
        retry_count = entry.retry_count,
        "Updated outbox entry"
    );
    Ok(())
}

/// Count entries per status.
pub fn count_by_status(conn: &Connection) -> DatabaseResult<StatusCounts> {
    let mut stmt = conn.prepare_cached("SELECT status, COUNT(*) FROM outbox GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        let count = count.max(0) as u64;
        match OutboxStatus::parse(&status) {
            Some(OutboxStatus::Pending) => counts.pending = count,
            Some(OutboxStatus::Processed) => counts.processed = count,
            Some(OutboxStatus::Failed) => counts.failed = count,
            None => {
                return Err(DatabaseError::InvalidData(format!(
                    "unknown outbox status {status:?}"
                )))
            }
        }
    }
    Ok(counts)
}

/// Raw row before status and timestamps are validated.
struct EntryRow {
    id: String,
    payload: String,
    action: String,
    status: String,
    traceparent: Option<String>,
    retry_count: u32,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload: row.get(1)?,
            action: row.get(2)?,
            status: row.get(3)?,
            traceparent: row.get(4)?,
            retry_count: row.get(5)?,
            last_error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_entry(self) -> DatabaseResult<OutboxEntry> {
        let status = OutboxStatus::parse(&self.status).ok_or_else(|| {
            DatabaseError::InvalidData(format!(
                "outbox entry {} has unknown status {:?}",
                self.id, self.status
            ))
        })?;

        Ok(OutboxEntry {
            status,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            id: self.id,
            payload: self.payload,
            action: self.action,
            traceparent: self.traceparent,
            retry_count: self.retry_count,
            last_error: self.last_error,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData(format!("bad timestamp {s:?}: {e}")))
}
