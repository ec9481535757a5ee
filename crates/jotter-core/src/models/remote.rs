//! Remote record representation used by the download path

use serde::{Deserialize, Serialize};

use super::record::{RecordId, RecordKind};

/// A record as the remote store reports it.
///
/// Only what the engine needs to detect divergence and apply
/// server-origin writes; the payload stays opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub owner_id: String,
    pub kind: RecordKind,
    pub payload: serde_json::Value,
    /// Version number the remote store holds for this record
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
    pub archived_at: Option<i64>,
}
