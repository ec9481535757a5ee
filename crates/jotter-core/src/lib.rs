//! jotter-core - Core library for Jotter
//!
//! This crate contains the shared models, the local record store, and the
//! synchronization engine used by all Jotter interfaces (API server, CLI).

pub mod bulk;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod limiter;
pub mod models;
pub mod net;
pub mod service;
pub mod sync;

pub use error::{Error, Result};
pub use models::{Record, RecordId, RecordKind, SyncReport, SyncState};
pub use service::RecordService;
