//! Conflict detection
//!
//! Classification works from version numbers alone. `base` is the last
//! remote version recorded locally; a fork exists when both sides moved
//! past it, and neither side is strictly newer by version number. Forks
//! are surfaced with both versions and timestamps, never auto-merged.

use crate::models::Record;

/// How a record relates to what the remote store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing to do on either side
    UpToDate,
    /// Local moved, remote did not: push
    NeedsUpload,
    /// Remote moved, local did not: pull
    NeedsDownload,
    /// Both sides moved past the common base
    Conflict,
}

/// Classify a local record against the version the remote store reports.
#[must_use]
pub fn classify(local: &Record, remote_version: i64) -> Disposition {
    let base = local.remote_version;
    let local_moved = local.local_version > base;
    let remote_moved = remote_version > base;

    match (local_moved, remote_moved) {
        (false, false) => Disposition::UpToDate,
        (false, true) => Disposition::NeedsDownload,
        (true, false) => Disposition::NeedsUpload,
        (true, true) => Disposition::Conflict,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordKind, SyncState};
    use serde_json::json;

    fn record(local_version: i64, remote_version: i64) -> Record {
        let mut record = Record::new("user-1", RecordKind::Entry, json!({}));
        record.local_version = local_version;
        record.remote_version = remote_version;
        record.sync_state = if local_version == remote_version {
            SyncState::Synced
        } else {
            SyncState::Pending
        };
        record
    }

    #[test]
    fn up_to_date_when_neither_moved() {
        assert_eq!(classify(&record(3, 3), 3), Disposition::UpToDate);
    }

    #[test]
    fn needs_download_when_only_remote_moved() {
        assert_eq!(classify(&record(3, 3), 5), Disposition::NeedsDownload);
    }

    #[test]
    fn needs_upload_when_only_local_moved() {
        assert_eq!(classify(&record(4, 3), 3), Disposition::NeedsUpload);
    }

    #[test]
    fn conflict_when_both_moved_past_base() {
        assert_eq!(classify(&record(4, 3), 4), Disposition::Conflict);
    }

    #[test]
    fn never_synced_record_uploads() {
        // remote_version 0 means the remote has never accepted anything
        assert_eq!(classify(&record(1, 0), 0), Disposition::NeedsUpload);
    }

    #[test]
    fn two_device_fork_from_shared_base() {
        // Synced at version 1, edited offline to 2 while another device
        // pushed its own version 2 for the same base.
        let local = record(2, 1);
        assert_eq!(classify(&local, 2), Disposition::Conflict);
    }

    #[test]
    fn remote_behind_base_still_uploads() {
        // A remote that somehow reports less than our recorded base is
        // not a fork; local is strictly ahead.
        assert_eq!(classify(&record(4, 3), 2), Disposition::NeedsUpload);
    }
}
