//! Entry store implementations.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use chrono::Utc;
use outbox_database::{queries, AsyncDatabase, DatabaseError, NewOutboxEntry, OutboxEntry};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Durable table of outbox entries, as seen by the dispatcher.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// All PENDING entries in insertion order.
    async fn fetch_pending(&self) -> DispatchResult<Vec<OutboxEntry>>;

    /// Persist the full current state of one entry.
    ///
    /// Must refuse to overwrite a row that already reached a terminal status.
    async fn save(&self, entry: &OutboxEntry) -> DispatchResult<()>;

    /// Current stored state of one entry.
    ///
    /// Must observe every save issued before it, including one whose caller
    /// gave up waiting.
    async fn load(&self, id: &str) -> DispatchResult<Option<OutboxEntry>>;
}

/// SQLite-backed store over the async executor.
#[derive(Clone)]
pub struct SqliteEntryStore {
    db: AsyncDatabase,
}

impl SqliteEntryStore {
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Check the connection and bound its lock waits by the config's store
    /// budget.
    pub async fn connect(db: AsyncDatabase, config: &DispatcherConfig) -> DispatchResult<Self> {
        db.health_check().await?;
        db.set_busy_timeout(config.lock_wait()).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn fetch_pending(&self) -> DispatchResult<Vec<OutboxEntry>> {
        let entries = self
            .db
            .call(|conn| queries::list_pending(conn, None))
            .await?;
        debug!(count = entries.len(), "Fetched pending entries");
        Ok(entries)
    }

    async fn save(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let entry = entry.clone();
        self.db
            .call(move |conn| queries::update_entry(conn, &entry))
            .await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> DispatchResult<Option<OutboxEntry>> {
        let id = id.to_string();
        Ok(self.db.call(move |conn| queries::get_entry(conn, &id)).await?)
    }
}

#[derive(Default)]
struct Faults {
    fetch_failures: u32,
    save_failures: u32,
    save_failures_by_id: HashMap<String, u32>,
    fetch_delay: Option<Duration>,
    save_delay: Option<Duration>,
    save_ack_delay: Option<Duration>,
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<OutboxEntry>,
    fetches: usize,
    saves: usize,
}

/// In-process store with the same save guard as the SQLite table.
///
/// Fetch and save failures can be injected to exercise the dispatcher's
/// error paths.
#[derive(Default)]
pub struct InMemoryEntryStore {
    state: Mutex<MemoryState>,
    faults: Mutex<Faults>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new pending entry.
    pub fn insert(&self, entry: NewOutboxEntry) -> OutboxEntry {
        let entry = entry.into_entry(Utc::now());
        self.state.lock().entries.push(entry.clone());
        entry
    }

    pub fn get(&self, id: &str) -> Option<OutboxEntry> {
        self.state.lock().entries.iter().find(|e| e.id == id).cloned()
    }

    /// Number of fetch calls that reached the store.
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.state.lock().saves
    }

    /// Fail the next `times` fetches.
    pub fn fail_fetches(&self, times: u32) {
        self.faults.lock().fetch_failures = times;
    }

    /// Fail the next `times` saves, whichever entry they are for.
    pub fn fail_saves(&self, times: u32) {
        self.faults.lock().save_failures = times;
    }

    /// Fail the next `times` saves of one entry.
    pub fn fail_saves_for(&self, id: &str, times: u32) {
        self.faults.lock().save_failures_by_id.insert(id.to_string(), times);
    }

    pub fn delay_fetches(&self, delay: Duration) {
        self.faults.lock().fetch_delay = Some(delay);
    }

    pub fn delay_saves(&self, delay: Duration) {
        self.faults.lock().save_delay = Some(delay);
    }

    /// Apply saves immediately but return from them only after `delay`.
    pub fn delay_save_acks(&self, delay: Duration) {
        self.faults.lock().save_ack_delay = Some(delay);
    }

    fn take_fetch_fault(&self) -> (bool, Option<Duration>) {
        let mut faults = self.faults.lock();
        let fail = faults.fetch_failures > 0;
        if fail {
            faults.fetch_failures -= 1;
        }
        (fail, faults.fetch_delay)
    }

    fn take_save_fault(&self, id: &str) -> (bool, Option<Duration>) {
        let mut faults = self.faults.lock();
        let delay = faults.save_delay;
        if faults.save_failures > 0 {
            faults.save_failures -= 1;
            return (true, delay);
        }
        if let Some(remaining) = faults.save_failures_by_id.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return (true, delay);
            }
        }
        (false, delay)
    }

    fn apply_save(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .entries
            .iter_mut()
            .find(|e| e.id == entry.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("outbox entry {}", entry.id)))?;

        if !stored.is_pending() || stored.retry_count > entry.retry_count {
            return Err(DatabaseError::Conflict(format!(
                "outbox entry {} is {} with retry_count {}",
                stored.id, stored.status, stored.retry_count
            ))
            .into());
        }

        *stored = OutboxEntry {
            updated_at: Utc::now(),
            ..entry.clone()
        };
        state.saves += 1;
        Ok(())
    }
}

fn injected(operation: &str) -> DispatchError {
    DispatchError::Database(DatabaseError::Connection(format!("injected {operation} failure")))
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn fetch_pending(&self) -> DispatchResult<Vec<OutboxEntry>> {
        let (fail, delay) = self.take_fetch_fault();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.fetches += 1;
        if fail {
            return Err(injected("fetch"));
        }

        // Vec order is insertion order.
        Ok(state
            .entries
            .iter()
            .filter(|e| e.is_pending())
            .cloned()
            .collect())
    }

    async fn save(&self, entry: &OutboxEntry) -> DispatchResult<()> {
        let (fail, delay) = self.take_save_fault(&entry.id);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(injected("save"));
        }

        self.apply_save(entry)?;

        let ack_delay = self.faults.lock().save_ack_delay;
        if let Some(delay) = ack_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> DispatchResult<Option<OutboxEntry>> {
        Ok(self.get(id))
    }
}
