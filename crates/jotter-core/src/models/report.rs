//! Sync session outcome models

use serde::{Deserialize, Serialize};

use super::record::RecordId;

/// A detected fork: both sides advanced past a common base version.
///
/// Both versions and timestamps are surfaced; the engine never discards
/// either side's data automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Record involved in the conflict
    pub record_id: RecordId,
    /// Local version at detection time
    pub local_version: i64,
    /// Remote version at detection time
    pub remote_version: i64,
    /// Local row's last update (Unix ms)
    pub local_updated_at: i64,
    /// Remote row's last update (Unix ms)
    pub remote_updated_at: i64,
}

/// A record that could not be propagated, with its last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub record_id: RecordId,
    pub error: String,
    /// Permanent failures are dropped from the retry queue
    pub permanent: bool,
}

/// The outcome of one orchestrated sync session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Records reconciled this session (uploads and applied downloads)
    pub synced_ids: Vec<RecordId>,
    /// Records that failed, each with its last error
    pub failed: Vec<SyncFailure>,
    /// Forks detected this session
    pub conflicts: Vec<SyncConflict>,
    /// Session start (Unix ms)
    pub started_at: i64,
    /// Session end (Unix ms)
    pub finished_at: i64,
    /// True when a deadline or degraded link cut the session short
    pub partial: bool,
}

impl SyncReport {
    /// True when nothing was synced, failed, or conflicted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.synced_ids.is_empty() && self.failed.is_empty() && self.conflicts.is_empty()
    }
}

/// A row from the persisted conflict log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictLogEntry {
    /// Log row identifier
    pub id: i64,
    /// The detected fork
    pub conflict: SyncConflict,
    /// When the fork was detected (Unix ms)
    pub detected_at: i64,
    /// Set once an explicit resolution action re-queued the record
    pub resolved_at: Option<i64>,
}

/// Persisted summary of a finished session, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub owner_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub synced_count: i64,
    pub failed_count: i64,
    pub conflict_count: i64,
}

impl RunSummary {
    /// Build the persisted summary from a finished session report.
    #[must_use]
    pub fn from_report(owner_id: impl Into<String>, report: &SyncReport) -> Self {
        Self {
            owner_id: owner_id.into(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            synced_count: report.synced_ids.len() as i64,
            failed_count: report.failed.len() as i64,
            conflict_count: report.conflicts.len() as i64,
        }
    }
}
