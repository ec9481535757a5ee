//! Offline queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::RecordId;

/// The mutation a queue entry intends to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    Create,
    Update,
    Delete,
}

impl QueueOperation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown queue operation: {other}")),
        }
    }
}

/// One durable intention to propagate a record to the remote store.
///
/// At most one live entry exists per record; a newer mutation collapses
/// into the existing entry instead of appending a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Record this entry propagates
    pub record_id: RecordId,
    /// Mutation to replay
    pub operation: QueueOperation,
    /// Failed upload attempts so far
    pub attempts: i64,
    /// Message from the most recent failure
    pub last_error: Option<String>,
    /// When the record first entered the queue (Unix ms)
    pub enqueued_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_roundtrip() {
        for op in [
            QueueOperation::Create,
            QueueOperation::Update,
            QueueOperation::Delete,
        ] {
            let parsed: QueueOperation = op.as_str().parse().unwrap();
            assert_eq!(parsed, op);
        }
        assert!("upsert".parse::<QueueOperation>().is_err());
    }
}
