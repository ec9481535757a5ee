//! The synchronization engine: conflict detection, transports, session
//! orchestration, and background scheduling.

pub mod conflict;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use conflict::{classify, Disposition};
pub use scheduler::SyncScheduler;
pub use session::{SyncDirection, SyncOrchestrator, SyncRequest};
pub use transport::{HttpTransport, MockTransport, PushOutcome, RecordTransport, ScriptedPush};
