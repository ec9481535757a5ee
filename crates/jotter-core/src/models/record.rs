//! Record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The closed set of content shapes a record may carry.
///
/// The sync engine never interprets the payload; the kind exists so
/// clients can route rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Free-form journal entry
    Entry,
    /// Checklist with items in the payload
    Checklist,
    /// Short captured snippet (link, quote, code)
    Snippet,
}

impl RecordKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Checklist => "checklist",
            Self::Snippet => "snippet",
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "checklist" => Ok(Self::Checklist),
            "snippet" => Ok(Self::Snippet),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// Where a record sits in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Exists locally, never handed to the queue
    Local,
    /// Queued for upload
    Pending,
    /// An upload for this record is in flight
    Syncing,
    /// Local and remote agree
    Synced,
    /// Both sides advanced past a common base; needs explicit resolution
    Conflict,
    /// Last attempt failed; retryable failures stay queued
    Failed,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Conflict => "conflict",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "conflict" => Ok(Self::Conflict),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync state: {other}")),
        }
    }
}

/// A unit of user content tracked for synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier, assigned at creation, never reused
    pub id: RecordId,
    /// Owning user
    pub owner_id: String,
    /// Content shape
    pub kind: RecordKind,
    /// Opaque content; the engine treats this as a value
    pub payload: serde_json::Value,
    /// Incremented on every local mutation
    pub local_version: i64,
    /// Last version accepted by the remote store; 0 if never synced
    pub remote_version: i64,
    /// Sync lifecycle state
    pub sync_state: SyncState,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp; deletion is a state so it can be synced
    pub deleted_at: Option<i64>,
    /// Archive timestamp set by bulk archive
    pub archived_at: Option<i64>,
}

impl Record {
    /// Create a new record owned by `owner_id` with the given payload.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, kind: RecordKind, payload: serde_json::Value) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            owner_id: owner_id.into(),
            kind,
            payload,
            local_version: 1,
            remote_version: 0,
            sync_state: SyncState::Local,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            archived_at: None,
        }
    }

    /// Whether the record has been soft-deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether local and remote agree on the latest version.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        self.remote_version == self.local_version
    }

    /// Whether there is a local mutation the remote has not seen.
    ///
    /// Holds `remote_version <= local_version` for every non-conflicted
    /// record; a conflicted record is excluded because neither side is
    /// strictly newer.
    #[must_use]
    pub fn has_local_changes(&self) -> bool {
        self.local_version > self.remote_version && !matches!(self.sync_state, SyncState::Conflict)
    }
}
