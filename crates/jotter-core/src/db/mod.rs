//! Database layer: connection management, migrations, and repositories

mod connection;
mod migrations;
pub mod queue;
pub mod record_store;

pub use connection::Database;
pub use queue::{QueueStore, SqliteQueueStore};
pub use record_store::{RecordStore, SqliteRecordStore};
