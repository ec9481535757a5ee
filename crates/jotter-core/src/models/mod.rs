//! Data models for jotter-core

mod queue;
mod record;
mod remote;
mod report;

pub use queue::{QueueEntry, QueueOperation};
pub use record::{Record, RecordId, RecordKind, SyncState};
pub use remote::RemoteRecord;
pub use report::{ConflictLogEntry, RunSummary, SyncConflict, SyncFailure, SyncReport};
