//! Shared database service wrapper used by the engine and its callers.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::db::{
    record_store, Database, QueueStore, RecordStore, SqliteQueueStore, SqliteRecordStore,
};
use crate::error::{Error, Result};
use crate::models::{
    ConflictLogEntry, QueueEntry, QueueOperation, Record, RecordId, RecordKind, RemoteRecord,
    RunSummary, SyncConflict, SyncState,
};

/// A mutation the engine should eventually propagate, announced on the
/// event channel right after it is durably written and queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub owner_id: String,
    pub record_id: RecordId,
    pub operation: QueueOperation,
}

/// Thread-safe service for record, queue, and sync bookkeeping operations.
#[derive(Clone)]
pub struct RecordService {
    db: Arc<Mutex<Database>>,
    notifier: Option<UnboundedSender<MutationEvent>>,
}

impl RecordService {
    /// Open a service backed by a database file.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            notifier: None,
        })
    }

    /// Open an in-memory service (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            notifier: None,
        })
    }

    /// Attach a channel that receives an event after every local mutation.
    #[must_use]
    pub fn with_mutation_notifier(mut self, notifier: UnboundedSender<MutationEvent>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn notify(&self, owner_id: &str, record_id: RecordId, operation: QueueOperation) {
        if let Some(notifier) = &self.notifier {
            let event = MutationEvent {
                owner_id: owner_id.to_string(),
                record_id,
                operation,
            };
            if notifier.send(event).is_err() {
                tracing::debug!("Mutation event receiver dropped");
            }
        }
    }

    /// Create a record and queue it for upload.
    pub async fn create_record(
        &self,
        owner_id: &str,
        kind: RecordKind,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let record = Record::new(owner_id, kind, payload);
        let stored = {
            let db = self.db.lock().await;
            let stored = SqliteRecordStore::new(db.connection()).put(&record)?;
            SqliteQueueStore::new(db.connection()).enqueue(&stored.id, QueueOperation::Create)?;
            stored
        };
        self.notify(owner_id, stored.id, QueueOperation::Create);
        Ok(stored)
    }

    /// Replace a record's payload and queue the update.
    pub async fn update_record(
        &self,
        id: &RecordId,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let stored = {
            let db = self.db.lock().await;
            let store = SqliteRecordStore::new(db.connection());
            let mut record = store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
            if record.is_deleted() {
                return Err(Error::InvalidInput("cannot update a deleted record".into()));
            }
            record.payload = payload;
            let stored = store.put(&record)?;
            let operation = if stored.remote_version == 0 {
                QueueOperation::Create
            } else {
                QueueOperation::Update
            };
            SqliteQueueStore::new(db.connection()).enqueue(&stored.id, operation)?;
            stored
        };
        self.notify(&stored.owner_id, stored.id, QueueOperation::Update);
        Ok(stored)
    }

    /// Soft-delete a record and queue the deletion.
    pub async fn delete_record(&self, id: &RecordId) -> Result<Record> {
        let stored = {
            let db = self.db.lock().await;
            let stored = SqliteRecordStore::new(db.connection()).delete(id)?;
            SqliteQueueStore::new(db.connection()).enqueue(id, QueueOperation::Delete)?;
            stored
        };
        self.notify(&stored.owner_id, *id, QueueOperation::Delete);
        Ok(stored)
    }

    /// Stamp a record archived and queue the update.
    pub async fn archive_record(&self, id: &RecordId) -> Result<Record> {
        let stored = {
            let db = self.db.lock().await;
            let stored = SqliteRecordStore::new(db.connection()).archive(id)?;
            SqliteQueueStore::new(db.connection()).enqueue(id, QueueOperation::Update)?;
            stored
        };
        self.notify(&stored.owner_id, *id, QueueOperation::Update);
        Ok(stored)
    }

    /// Put a record back in line for upload and stamp any open conflict
    /// rows resolved. This is the explicit action that re-enters the queue
    /// after a conflict.
    pub async fn resync_record(&self, id: &RecordId) -> Result<Record> {
        let stored = {
            let db = self.db.lock().await;
            let store = SqliteRecordStore::new(db.connection());
            let record = store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?;
            store.resolve_conflicts(id)?;
            store.mark_pending(id)?;
            let operation = if record.remote_version == 0 {
                QueueOperation::Create
            } else {
                QueueOperation::Update
            };
            SqliteQueueStore::new(db.connection()).enqueue(id, operation)?;
            store.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))?
        };
        self.notify(&stored.owner_id, *id, QueueOperation::Update);
        Ok(stored)
    }

    /// Fetch a record by id (soft-deleted rows included).
    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).get(id)
    }

    /// List an owner's records, newest first.
    pub async fn list_records(
        &self,
        owner_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).list(owner_id, limit, offset)
    }

    /// Records with unpropagated local changes.
    pub async fn list_unsynced(&self, owner_id: &str) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).list_unsynced(owner_id)
    }

    pub async fn mark_syncing(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).mark_syncing(id)
    }

    pub async fn mark_synced(
        &self,
        id: &RecordId,
        remote_version: i64,
        pushed_local_version: i64,
    ) -> Result<SyncState> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).mark_synced(
            id,
            remote_version,
            pushed_local_version,
        )
    }

    pub async fn mark_conflict(
        &self,
        id: &RecordId,
        remote_version: i64,
        remote_updated_at: i64,
    ) -> Result<SyncConflict> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).mark_conflict(id, remote_version, remote_updated_at)
    }

    pub async fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).mark_failed(id, error)
    }

    /// Apply a server-origin write.
    pub async fn apply_remote(&self, incoming: &RemoteRecord) -> Result<Record> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).apply_remote(incoming)
    }

    /// Highest remote version known locally for an owner.
    pub async fn max_remote_version(&self, owner_id: &str) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).max_remote_version(owner_id)
    }

    /// Live queue entries for an owner, oldest first.
    pub async fn drain_queue(
        &self,
        owner_id: &str,
        attempt_ceiling: i64,
    ) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).drain(owner_id, attempt_ceiling)
    }

    pub async fn remove_queue_entry(&self, record_id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).remove(record_id)
    }

    pub async fn increment_attempts(&self, record_id: &RecordId, error: &str) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).increment_attempts(record_id, error)
    }

    pub async fn kill_queue_entry(
        &self,
        record_id: &RecordId,
        attempt_ceiling: i64,
        error: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).kill(record_id, attempt_ceiling, error)
    }

    /// Number of live queue entries for an owner.
    pub async fn queue_len(&self, owner_id: &str, attempt_ceiling: i64) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).len(owner_id, attempt_ceiling)
    }

    /// Owners with live queue entries.
    pub async fn owners_with_pending(&self, attempt_ceiling: i64) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        SqliteQueueStore::new(db.connection()).owners_with_pending(attempt_ceiling)
    }

    /// Recent conflict log rows for an owner.
    pub async fn list_conflicts(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<ConflictLogEntry>> {
        let db = self.db.lock().await;
        SqliteRecordStore::new(db.connection()).list_conflicts(owner_id, limit)
    }

    /// Clear resolved conflict history and dead queue entries older than
    /// the cutoff. Returns `(conflicts_removed, entries_removed)`.
    pub async fn purge_history(
        &self,
        attempt_ceiling: i64,
        cutoff_ms: i64,
    ) -> Result<(usize, usize)> {
        let db = self.db.lock().await;
        let conflicts =
            SqliteRecordStore::new(db.connection()).purge_resolved_conflicts(cutoff_ms)?;
        let entries = SqliteQueueStore::new(db.connection()).purge_stale(attempt_ceiling, cutoff_ms)?;
        Ok((conflicts, entries))
    }

    /// Persist a finished session's summary.
    pub async fn save_run_summary(&self, summary: &RunSummary) -> Result<()> {
        let db = self.db.lock().await;
        record_store::save_run_summary(db.connection(), summary)
    }

    /// Latest persisted run summary for an owner.
    pub async fn last_run_summary(&self, owner_id: &str) -> Result<Option<RunSummary>> {
        let db = self.db.lock().await;
        record_store::last_run_summary(db.connection(), owner_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_queues_and_notifies() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let service = RecordService::open_in_memory()
            .unwrap()
            .with_mutation_notifier(tx);

        let record = service
            .create_record("user-1", RecordKind::Entry, json!({"text": "hello"}))
            .await
            .unwrap();

        assert_eq!(service.queue_len("user-1", 5).await.unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.record_id, record.id);
        assert_eq!(event.operation, QueueOperation::Create);
        assert_eq!(event.owner_id, "user-1");
    }

    #[tokio::test]
    async fn update_collapses_queue_entry() {
        let service = RecordService::open_in_memory().unwrap();

        let record = service
            .create_record("user-1", RecordKind::Entry, json!({"text": "v1"}))
            .await
            .unwrap();
        service
            .update_record(&record.id, json!({"text": "v2"}))
            .await
            .unwrap();

        // One collapsed entry, not two
        assert_eq!(service.queue_len("user-1", 5).await.unwrap(), 1);
        let entries = service.drain_queue("user-1", 5).await.unwrap();
        // Never uploaded, so the collapsed intent is still a create
        assert_eq!(entries[0].operation, QueueOperation::Create);
    }

    #[tokio::test]
    async fn update_missing_record_fails() {
        let service = RecordService::open_in_memory().unwrap();
        let err = service
            .update_record(&RecordId::new(), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn resync_resolves_conflicts_and_requeues() {
        let service = RecordService::open_in_memory().unwrap();

        let record = service
            .create_record("user-1", RecordKind::Entry, json!({"text": "x"}))
            .await
            .unwrap();
        service.mark_conflict(&record.id, 2, 999).await.unwrap();
        service.remove_queue_entry(&record.id).await.unwrap();

        let resynced = service.resync_record(&record.id).await.unwrap();
        assert_eq!(resynced.sync_state, SyncState::Pending);
        assert_eq!(service.queue_len("user-1", 5).await.unwrap(), 1);

        let conflicts = service.list_conflicts("user-1", 10).await.unwrap();
        assert!(conflicts[0].resolved_at.is_some());
    }
}
