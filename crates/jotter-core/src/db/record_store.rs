//! Record store implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::{Error, Result};
use crate::models::{
    ConflictLogEntry, Record, RecordId, RecordKind, RemoteRecord, SyncConflict, SyncState,
};
use rusqlite::{params, Connection, OptionalExtension};

const RECORD_COLUMNS: &str = "id, owner_id, kind, payload, local_version, remote_version, \
     sync_state, created_at, updated_at, deleted_at, archived_at";

/// Trait for record storage operations
///
/// All writes are atomic per record. Local mutations always bump
/// `local_version` and set the record `pending`; the server-origin write
/// path (`apply_remote`) is the only one that moves both version numbers
/// together.
pub trait RecordStore {
    /// Write a local mutation. Inserts the record on first write; on later
    /// writes replaces the payload, bumps `local_version` from the stored
    /// value, and resets the state to `pending`.
    fn put(&self, record: &Record) -> Result<Record>;

    /// Get a record by ID, soft-deleted rows included
    fn get(&self, id: &RecordId) -> Result<Option<Record>>;

    /// List records for an owner (excluding deleted), newest first
    fn list(&self, owner_id: &str, limit: usize, offset: usize) -> Result<Vec<Record>>;

    /// Soft delete a record; deletion is itself a mutation to sync
    fn delete(&self, id: &RecordId) -> Result<Record>;

    /// Stamp a record archived; archival is a mutation to sync
    fn archive(&self, id: &RecordId) -> Result<Record>;

    /// Records for an owner with unpropagated local changes
    fn list_unsynced(&self, owner_id: &str) -> Result<Vec<Record>>;

    /// Flag that an upload for this record is in flight
    fn mark_syncing(&self, id: &RecordId) -> Result<()>;

    /// Record a remote-accepted push. If `local_version` moved past
    /// `pushed_local_version` while the push was in flight, the record
    /// stays `pending` so the newer payload uploads next session. Returns
    /// the resulting state.
    fn mark_synced(
        &self,
        id: &RecordId,
        remote_version: i64,
        pushed_local_version: i64,
    ) -> Result<SyncState>;

    /// Enter the conflict state and log the fork with both sides' versions
    /// and timestamps
    fn mark_conflict(
        &self,
        id: &RecordId,
        remote_version: i64,
        remote_updated_at: i64,
    ) -> Result<SyncConflict>;

    /// Flag the last attempt as failed
    fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()>;

    /// Put a record back in line for upload (explicit resync)
    fn mark_pending(&self, id: &RecordId) -> Result<()>;

    /// Server-origin write: set both versions to the incoming version and
    /// the state to `synced`. Never decreases `local_version`; if the local
    /// row is already ahead of the incoming version this is a no-op.
    fn apply_remote(&self, incoming: &RemoteRecord) -> Result<Record>;

    /// Highest remote version known locally for an owner (download cursor)
    fn max_remote_version(&self, owner_id: &str) -> Result<i64>;

    /// Recent conflict log rows for an owner, newest first
    fn list_conflicts(&self, owner_id: &str, limit: usize) -> Result<Vec<ConflictLogEntry>>;

    /// Stamp all open conflict rows for a record resolved; returns how many
    fn resolve_conflicts(&self, id: &RecordId) -> Result<usize>;

    /// Drop resolved conflict rows older than the cutoff; returns how many
    fn purge_resolved_conflicts(&self, cutoff_ms: i64) -> Result<usize>;
}

/// `SQLite` implementation of `RecordStore`
pub struct SqliteRecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordStore<'a> {
    /// Create a new store with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let id: String = row.get(0)?;
        let kind: String = row.get(2)?;
        let payload: String = row.get(3)?;
        let state: String = row.get(6)?;
        Ok(Record {
            id: id.parse().unwrap_or_default(),
            owner_id: row.get(1)?,
            kind: kind.parse().unwrap_or(RecordKind::Entry),
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            local_version: row.get(4)?,
            remote_version: row.get(5)?,
            sync_state: state.parse().unwrap_or(SyncState::Local),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            deleted_at: row.get(9)?,
            archived_at: row.get(10)?,
        })
    }

    fn require(&self, id: &RecordId) -> Result<Record> {
        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn parse_conflict_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictLogEntry> {
        let record_id: String = row.get(1)?;
        Ok(ConflictLogEntry {
            id: row.get(0)?,
            conflict: SyncConflict {
                record_id: record_id.parse().unwrap_or_default(),
                local_version: row.get(2)?,
                remote_version: row.get(3)?,
                local_updated_at: row.get(4)?,
                remote_updated_at: row.get(5)?,
            },
            detected_at: row.get(6)?,
            resolved_at: row.get(7)?,
        })
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn put(&self, record: &Record) -> Result<Record> {
        let now = chrono::Utc::now().timestamp_millis();
        let payload = serde_json::to_string(&record.payload)?;

        self.conn.execute(
            "INSERT INTO records (id, owner_id, kind, payload, local_version, remote_version,
                                  sync_state, created_at, updated_at, deleted_at, archived_at)
             VALUES (?, ?, ?, ?, 1, 0, 'pending', ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 kind = excluded.kind,
                 payload = excluded.payload,
                 local_version = records.local_version + 1,
                 sync_state = 'pending',
                 updated_at = excluded.updated_at,
                 deleted_at = excluded.deleted_at,
                 archived_at = excluded.archived_at",
            params![
                record.id.as_str(),
                record.owner_id,
                record.kind.as_str(),
                payload,
                record.created_at,
                now,
                record.deleted_at,
                record.archived_at
            ],
        )?;

        self.require(&record.id)
    }

    fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let result = self.conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
            params![id.as_str()],
            Self::parse_record,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, owner_id: &str, limit: usize, offset: usize) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner_id = ? AND deleted_at IS NULL
             ORDER BY updated_at DESC
             LIMIT ? OFFSET ?"
        ))?;

        let records = stmt
            .query_map(
                params![owner_id, limit as i64, offset as i64],
                Self::parse_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn delete(&self, id: &RecordId) -> Result<Record> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self.conn.execute(
            "UPDATE records
             SET deleted_at = ?, updated_at = ?,
                 local_version = local_version + 1, sync_state = 'pending'
             WHERE id = ? AND deleted_at IS NULL",
            params![now, now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.require(id)
    }

    fn archive(&self, id: &RecordId) -> Result<Record> {
        let now = chrono::Utc::now().timestamp_millis();

        let rows = self.conn.execute(
            "UPDATE records
             SET archived_at = ?, updated_at = ?,
                 local_version = local_version + 1, sync_state = 'pending'
             WHERE id = ? AND deleted_at IS NULL AND archived_at IS NULL",
            params![now, now, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.require(id)
    }

    fn list_unsynced(&self, owner_id: &str) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE owner_id = ? AND sync_state IN ('local', 'pending', 'failed')
             ORDER BY updated_at ASC"
        ))?;

        let records = stmt
            .query_map(params![owner_id], Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn mark_syncing(&self, id: &RecordId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records SET sync_state = 'syncing'
             WHERE id = ? AND sync_state != 'conflict'",
            params![id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn mark_synced(
        &self,
        id: &RecordId,
        remote_version: i64,
        pushed_local_version: i64,
    ) -> Result<SyncState> {
        let rows = self.conn.execute(
            "UPDATE records
             SET remote_version = ?,
                 sync_state = CASE WHEN local_version = ? THEN 'synced' ELSE 'pending' END
             WHERE id = ?",
            params![remote_version, pushed_local_version, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(self.require(id)?.sync_state)
    }

    fn mark_conflict(
        &self,
        id: &RecordId,
        remote_version: i64,
        remote_updated_at: i64,
    ) -> Result<SyncConflict> {
        let tx = self.conn.unchecked_transaction()?;
        let local = self
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let now = chrono::Utc::now().timestamp_millis();
        tx.execute(
            "UPDATE records SET sync_state = 'conflict' WHERE id = ?",
            params![id.as_str()],
        )?;
        tx.execute(
            "INSERT INTO sync_conflicts
                 (record_id, local_version, remote_version,
                  local_updated_at, remote_updated_at, detected_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id.as_str(),
                local.local_version,
                remote_version,
                local.updated_at,
                remote_updated_at,
                now
            ],
        )?;
        tx.commit()?;

        Ok(SyncConflict {
            record_id: *id,
            local_version: local.local_version,
            remote_version,
            local_updated_at: local.updated_at,
            remote_updated_at,
        })
    }

    fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records SET sync_state = 'failed' WHERE id = ?",
            params![id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        tracing::debug!(record = %id, error, "Marked record failed");
        Ok(())
    }

    fn mark_pending(&self, id: &RecordId) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE records SET sync_state = 'pending' WHERE id = ?",
            params![id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        Ok(())
    }

    fn apply_remote(&self, incoming: &RemoteRecord) -> Result<Record> {
        let tx = self.conn.unchecked_transaction()?;
        let payload = serde_json::to_string(&incoming.payload)?;

        match self.get(&incoming.id)? {
            None => {
                tx.execute(
                    "INSERT INTO records (id, owner_id, kind, payload, local_version,
                                          remote_version, sync_state, created_at, updated_at,
                                          deleted_at, archived_at)
                     VALUES (?, ?, ?, ?, ?, ?, 'synced', ?, ?, ?, ?)",
                    params![
                        incoming.id.as_str(),
                        incoming.owner_id,
                        incoming.kind.as_str(),
                        payload,
                        incoming.version,
                        incoming.version,
                        incoming.created_at,
                        incoming.updated_at,
                        incoming.deleted_at,
                        incoming.archived_at
                    ],
                )?;
            }
            Some(local) if local.local_version > incoming.version => {
                // Local is already ahead; a server-origin write never
                // decreases local_version.
                tx.commit()?;
                return Ok(local);
            }
            Some(_) => {
                tx.execute(
                    "UPDATE records
                     SET kind = ?, payload = ?, local_version = ?, remote_version = ?,
                         sync_state = 'synced', updated_at = ?, deleted_at = ?, archived_at = ?
                     WHERE id = ?",
                    params![
                        incoming.kind.as_str(),
                        payload,
                        incoming.version,
                        incoming.version,
                        incoming.updated_at,
                        incoming.deleted_at,
                        incoming.archived_at,
                        incoming.id.as_str()
                    ],
                )?;
            }
        }

        tx.commit()?;
        self.require(&incoming.id)
    }

    fn max_remote_version(&self, owner_id: &str) -> Result<i64> {
        let version: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(remote_version), 0) FROM records WHERE owner_id = ?",
            params![owner_id],
            |row| row.get(0),
        )?;

        Ok(version)
    }

    fn list_conflicts(&self, owner_id: &str, limit: usize) -> Result<Vec<ConflictLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.record_id, c.local_version, c.remote_version,
                    c.local_updated_at, c.remote_updated_at, c.detected_at, c.resolved_at
             FROM sync_conflicts c
             JOIN records r ON r.id = c.record_id
             WHERE r.owner_id = ?
             ORDER BY c.detected_at DESC
             LIMIT ?",
        )?;

        let conflicts = stmt
            .query_map(params![owner_id, limit as i64], Self::parse_conflict_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn resolve_conflicts(&self, id: &RecordId) -> Result<usize> {
        let now = chrono::Utc::now().timestamp_millis();
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET resolved_at = ?
             WHERE record_id = ? AND resolved_at IS NULL",
            params![now, id.as_str()],
        )?;

        Ok(rows)
    }

    fn purge_resolved_conflicts(&self, cutoff_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM sync_conflicts
             WHERE resolved_at IS NOT NULL AND resolved_at < ?",
            params![cutoff_ms],
        )?;

        Ok(rows)
    }
}

/// Latest persisted run summary for an owner, if any.
pub fn last_run_summary(
    conn: &Connection,
    owner_id: &str,
) -> Result<Option<crate::models::RunSummary>> {
    let summary = conn
        .query_row(
            "SELECT owner_id, started_at, finished_at, synced_count, failed_count, conflict_count
             FROM sync_runs
             WHERE owner_id = ?
             ORDER BY finished_at DESC
             LIMIT 1",
            params![owner_id],
            |row| {
                Ok(crate::models::RunSummary {
                    owner_id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    synced_count: row.get(3)?,
                    failed_count: row.get(4)?,
                    conflict_count: row.get(5)?,
                })
            },
        )
        .optional()?;

    Ok(summary)
}

/// Persist a finished session's summary.
pub fn save_run_summary(conn: &Connection, summary: &crate::models::RunSummary) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_runs (owner_id, started_at, finished_at,
                                synced_count, failed_count, conflict_count)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            summary.owner_id,
            summary.started_at,
            summary.finished_at,
            summary.synced_count,
            summary.failed_count,
            summary.conflict_count
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::RecordKind;
    use serde_json::json;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_record(owner: &str) -> Record {
        Record::new(owner, RecordKind::Entry, json!({"text": "morning pages"}))
    }

    #[test]
    fn put_and_get() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let record = store.put(&make_record("user-1")).unwrap();
        assert_eq!(record.local_version, 1);
        assert_eq!(record.sync_state, SyncState::Pending);

        let fetched = store.get(&record.id).unwrap().unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.payload, json!({"text": "morning pages"}));
    }

    #[test]
    fn put_bumps_version_on_every_mutation() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let mut record = store.put(&make_record("user-1")).unwrap();
        record.payload = json!({"text": "edited"});
        let updated = store.put(&record).unwrap();

        assert_eq!(updated.local_version, 2);
        assert_eq!(updated.sync_state, SyncState::Pending);
        assert_eq!(updated.payload, json!({"text": "edited"}));
    }

    #[test]
    fn delete_is_soft_and_versioned() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let record = store.put(&make_record("user-1")).unwrap();
        let deleted = store.delete(&record.id).unwrap();

        assert!(deleted.is_deleted());
        assert_eq!(deleted.local_version, 2);
        assert_eq!(deleted.sync_state, SyncState::Pending);

        // Gone from listings, still fetchable for the sync path
        assert!(store.list("user-1", 10, 0).unwrap().is_empty());
        assert!(store.get(&record.id).unwrap().is_some());
    }

    #[test]
    fn mark_synced_happy_path() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let record = store.put(&make_record("user-1")).unwrap();
        let state = store.mark_synced(&record.id, 1, record.local_version).unwrap();

        assert_eq!(state, SyncState::Synced);
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.remote_version, 1);
        assert_eq!(stored.local_version, 1);
    }

    #[test]
    fn mark_synced_detects_stale_push() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let mut record = store.put(&make_record("user-1")).unwrap();
        let pushed_version = record.local_version;

        // Concurrent local edit while the push is in flight
        record.payload = json!({"text": "newer"});
        store.put(&record).unwrap();

        let state = store.mark_synced(&record.id, 1, pushed_version).unwrap();
        assert_eq!(state, SyncState::Pending);

        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.remote_version, 1);
        assert_eq!(stored.local_version, 2);
    }

    #[test]
    fn mark_conflict_logs_both_sides() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let record = store.put(&make_record("user-1")).unwrap();
        let conflict = store.mark_conflict(&record.id, 2, 999).unwrap();

        assert_eq!(conflict.local_version, 1);
        assert_eq!(conflict.remote_version, 2);
        assert_eq!(conflict.remote_updated_at, 999);

        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Conflict);

        let log = store.list_conflicts("user-1", 10).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].resolved_at.is_none());
    }

    #[test]
    fn apply_remote_inserts_and_updates() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let incoming = RemoteRecord {
            id: RecordId::new(),
            owner_id: "user-1".into(),
            kind: RecordKind::Entry,
            payload: json!({"text": "from another device"}),
            version: 3,
            created_at: 100,
            updated_at: 200,
            deleted_at: None,
            archived_at: None,
        };

        let applied = store.apply_remote(&incoming).unwrap();
        assert_eq!(applied.local_version, 3);
        assert_eq!(applied.remote_version, 3);
        assert_eq!(applied.sync_state, SyncState::Synced);
    }

    #[test]
    fn apply_remote_never_decreases_local_version() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let mut record = store.put(&make_record("user-1")).unwrap();
        record.payload = json!({"text": "v2"});
        let record = store.put(&record).unwrap();
        assert_eq!(record.local_version, 2);

        let incoming = RemoteRecord {
            id: record.id,
            owner_id: "user-1".into(),
            kind: RecordKind::Entry,
            payload: json!({"text": "stale"}),
            version: 1,
            created_at: record.created_at,
            updated_at: 50,
            deleted_at: None,
            archived_at: None,
        };

        let result = store.apply_remote(&incoming).unwrap();
        assert_eq!(result.local_version, 2);
        assert_eq!(result.payload, json!({"text": "v2"}));
    }

    #[test]
    fn list_unsynced_includes_failed() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let a = store.put(&make_record("user-1")).unwrap();
        let b = store.put(&make_record("user-1")).unwrap();
        store.put(&make_record("user-2")).unwrap();

        store.mark_failed(&a.id, "timeout").unwrap();
        store.mark_synced(&b.id, 1, b.local_version).unwrap();

        let unsynced = store.list_unsynced("user-1").unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, a.id);
    }

    #[test]
    fn resolve_and_purge_conflicts() {
        let db = setup();
        let store = SqliteRecordStore::new(db.connection());

        let record = store.put(&make_record("user-1")).unwrap();
        store.mark_conflict(&record.id, 2, 999).unwrap();

        assert_eq!(store.resolve_conflicts(&record.id).unwrap(), 1);

        let future = chrono::Utc::now().timestamp_millis() + 1_000;
        assert_eq!(store.purge_resolved_conflicts(future).unwrap(), 1);
        assert!(store.list_conflicts("user-1", 10).unwrap().is_empty());
    }

    #[test]
    fn run_summary_roundtrip() {
        let db = setup();
        let summary = crate::models::RunSummary {
            owner_id: "user-1".into(),
            started_at: 10,
            finished_at: 20,
            synced_count: 3,
            failed_count: 1,
            conflict_count: 0,
        };

        save_run_summary(db.connection(), &summary).unwrap();
        let loaded = last_run_summary(db.connection(), "user-1").unwrap().unwrap();
        assert_eq!(loaded, summary);

        assert!(last_run_summary(db.connection(), "user-2").unwrap().is_none());
    }
}
