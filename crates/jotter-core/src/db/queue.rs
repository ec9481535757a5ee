//! Offline queue implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for counters

use crate::error::{Error, Result};
use crate::models::{QueueEntry, QueueOperation, RecordId};
use rusqlite::{params, Connection};

/// Trait for the durable list of not-yet-uploaded mutations
///
/// At most one live entry exists per record. Entries whose attempt count
/// reached the ceiling are dead: they no longer drain, and stay visible
/// until purged.
pub trait QueueStore {
    /// Add an entry, collapsing into any live entry for the same record.
    /// A collapse replaces the operation and resets the failure bookkeeping
    /// (the new intent has not failed yet); `enqueued_at` is preserved so
    /// queue age stays honest.
    fn enqueue(&self, record_id: &RecordId, operation: QueueOperation) -> Result<QueueEntry>;

    /// Return (without removing) the live entries for an owner, oldest
    /// first. Removal happens only on confirmed success.
    fn drain(&self, owner_id: &str, attempt_ceiling: i64) -> Result<Vec<QueueEntry>>;

    /// Remove the entry for a record after a confirmed outcome
    fn remove(&self, record_id: &RecordId) -> Result<()>;

    /// Record a failed attempt; returns the new attempt count
    fn increment_attempts(&self, record_id: &RecordId, error: &str) -> Result<i64>;

    /// Kill an entry outright (validation rejection): it stops draining
    /// but remains visible until purged
    fn kill(&self, record_id: &RecordId, attempt_ceiling: i64, error: &str) -> Result<()>;

    /// Number of live entries for an owner
    fn len(&self, owner_id: &str, attempt_ceiling: i64) -> Result<usize>;

    /// Owners that currently have live entries
    fn owners_with_pending(&self, attempt_ceiling: i64) -> Result<Vec<String>>;

    /// Delete dead entries older than the cutoff; live entries are never
    /// touched. Returns how many were removed.
    fn purge_stale(&self, attempt_ceiling: i64, cutoff_ms: i64) -> Result<usize>;
}

/// `SQLite` implementation of `QueueStore`
pub struct SqliteQueueStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueStore<'a> {
    /// Create a new queue store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        let record_id: String = row.get(0)?;
        let operation: String = row.get(1)?;
        Ok(QueueEntry {
            record_id: record_id.parse().unwrap_or_default(),
            operation: operation.parse().unwrap_or(QueueOperation::Update),
            attempts: row.get(2)?,
            last_error: row.get(3)?,
            enqueued_at: row.get(4)?,
        })
    }

    fn get(&self, record_id: &RecordId) -> Result<Option<QueueEntry>> {
        let result = self.conn.query_row(
            "SELECT record_id, operation, attempts, last_error, enqueued_at
             FROM sync_queue WHERE record_id = ?",
            params![record_id.as_str()],
            Self::parse_entry,
        );

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl QueueStore for SqliteQueueStore<'_> {
    fn enqueue(&self, record_id: &RecordId, operation: QueueOperation) -> Result<QueueEntry> {
        let now = chrono::Utc::now().timestamp_millis();

        self.conn.execute(
            "INSERT INTO sync_queue (record_id, operation, attempts, last_error, enqueued_at)
             VALUES (?, ?, 0, NULL, ?)
             ON CONFLICT(record_id) DO UPDATE SET
                 operation = excluded.operation,
                 attempts = 0,
                 last_error = NULL",
            params![record_id.as_str(), operation.as_str(), now],
        )?;

        self.get(record_id)?
            .ok_or_else(|| Error::Database("queue entry missing right after enqueue".into()))
    }

    fn drain(&self, owner_id: &str, attempt_ceiling: i64) -> Result<Vec<QueueEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT q.record_id, q.operation, q.attempts, q.last_error, q.enqueued_at
             FROM sync_queue q
             JOIN records r ON r.id = q.record_id
             WHERE r.owner_id = ? AND q.attempts < ?
             ORDER BY q.enqueued_at ASC",
        )?;

        let entries = stmt
            .query_map(params![owner_id, attempt_ceiling], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    fn remove(&self, record_id: &RecordId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sync_queue WHERE record_id = ?",
            params![record_id.as_str()],
        )?;
        Ok(())
    }

    fn increment_attempts(&self, record_id: &RecordId, error: &str) -> Result<i64> {
        self.conn.execute(
            "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?
             WHERE record_id = ?",
            params![error, record_id.as_str()],
        )?;

        let attempts: i64 = self.conn.query_row(
            "SELECT attempts FROM sync_queue WHERE record_id = ?",
            params![record_id.as_str()],
            |row| row.get(0),
        )?;

        Ok(attempts)
    }

    fn kill(&self, record_id: &RecordId, attempt_ceiling: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET attempts = MAX(attempts, ?), last_error = ?
             WHERE record_id = ?",
            params![attempt_ceiling, error, record_id.as_str()],
        )?;
        Ok(())
    }

    fn len(&self, owner_id: &str, attempt_ceiling: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM sync_queue q
             JOIN records r ON r.id = q.record_id
             WHERE r.owner_id = ? AND q.attempts < ?",
            params![owner_id, attempt_ceiling],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    fn owners_with_pending(&self, attempt_ceiling: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT r.owner_id
             FROM sync_queue q
             JOIN records r ON r.id = q.record_id
             WHERE q.attempts < ?",
        )?;

        let owners = stmt
            .query_map(params![attempt_ceiling], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(owners)
    }

    fn purge_stale(&self, attempt_ceiling: i64, cutoff_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE attempts >= ? AND enqueued_at < ?",
            params![attempt_ceiling, cutoff_ms],
        )?;

        Ok(rows)
    }
}
