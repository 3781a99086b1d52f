//! Synchronous database wrapper for producers and tooling.

use crate::{
    migrations, queries, DatabaseError, DatabaseResult, NewOutboxEntry, OutboxEntry, StatusCounts,
};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::debug;

/// Database wrapper with query methods.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Record a single pending entry in its own transaction.
    pub fn record_entry(&self, entry: &NewOutboxEntry) -> DatabaseResult<OutboxEntry> {
        queries::insert_entry(&self.conn, entry)
    }

    /// Run a business change and record the entries it produced atomically.
    ///
    /// The closure performs the caller's own writes on the transaction and
    /// returns the entries to record. Either everything commits or nothing
    /// does.
    pub fn record_in_transaction<F>(&self, f: F) -> DatabaseResult<Vec<OutboxEntry>>
    where
        F: FnOnce(&Transaction<'_>) -> DatabaseResult<Vec<NewOutboxEntry>>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let new_entries = f(&tx)?;

        let mut recorded = Vec::with_capacity(new_entries.len());
        for entry in &new_entries {
            recorded.push(queries::insert_entry(&tx, entry)?);
        }

        tx.commit()?;
        debug!(count = recorded.len(), "Committed business change with outbox entries");
        Ok(recorded)
    }

    /// Get an entry by ID.
    pub fn get_entry(&self, id: &str) -> DatabaseResult<Option<OutboxEntry>> {
        queries::get_entry(&self.conn, id)
    }

    /// List pending entries in insertion order.
    pub fn list_pending(&self, limit: Option<usize>) -> DatabaseResult<Vec<OutboxEntry>> {
        queries::list_pending(&self.conn, limit)
    }

    /// Persist the state of one entry.
    pub fn update_entry(&self, entry: &OutboxEntry) -> DatabaseResult<()> {
        queries::update_entry(&self.conn, entry)
    }

    /// Count entries per status.
    pub fn count_by_status(&self) -> DatabaseResult<StatusCounts> {
        queries::count_by_status(&self.conn)
    }

    /// Fetch an entry that must exist.
    pub fn require_entry(&self, id: &str) -> DatabaseResult<OutboxEntry> {
        self.get_entry(id)?
            .ok_or_else(|| DatabaseError::NotFound(format!("outbox entry {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OutboxStatus;
    use tempfile::tempdir;

    fn create_test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn create_movies_table(db: &Database) {
        db.connection()
            .execute_batch("CREATE TABLE movies (id INTEGER PRIMARY KEY, title TEXT NOT NULL);")
            .unwrap();
    }

    #[test]
    fn test_open_on_disk_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.db");

        let db = Database::open(&path).unwrap();
        db.record_entry(&NewOutboxEntry::new("CREATE", "{}")).unwrap();
        assert!(path.exists());

        drop(db);
        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.count_by_status().unwrap().pending, 1);
    }

    #[test]
    fn test_record_in_transaction_commits_business_change_and_entry() {
        let db = create_test_db();
        create_movies_table(&db);

        let recorded = db
            .record_in_transaction(|tx| {
                tx.execute("INSERT INTO movies (id, title) VALUES (1, 'X')", [])?;
                Ok(vec![NewOutboxEntry::new("CREATE", r#"{"title":"X"}"#)])
            })
            .unwrap();

        assert_eq!(recorded.len(), 1);
        let stored = db.require_entry(&recorded[0].id).unwrap();
        assert_eq!(stored.status, OutboxStatus::Pending);

        let titles: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM movies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(titles, 1);
    }

    #[test]
    fn test_record_in_transaction_rolls_back_on_error() {
        let db = create_test_db();
        create_movies_table(&db);

        let result = db.record_in_transaction(|tx| {
            tx.execute("INSERT INTO movies (id, title) VALUES (1, 'X')", [])?;
            Err(DatabaseError::InvalidData("business rule violated".to_string()))
        });
        assert!(result.is_err());

        let titles: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM movies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(titles, 0);
        assert_eq!(db.count_by_status().unwrap().total(), 0);
    }

    #[test]
    fn test_require_entry_missing() {
        let db = create_test_db();
        assert!(matches!(
            db.require_entry("missing").unwrap_err(),
            DatabaseError::NotFound(_)
        ));
    }
}
