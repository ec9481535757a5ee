//! Error types for jotter-core

use thiserror::Error;

/// Result type alias using jotter-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in jotter-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No network: nothing was attempted, the mutation stays queued
    #[error("Device is offline; mutation stays queued")]
    Offline,

    /// Link is up but too degraded for multi-record work
    #[error("Connection quality too poor for bulk operations")]
    PoorConnection,

    /// Network reachable but the call failed
    #[error("Transport error: {message}")]
    Transport {
        /// Error message from the transport layer
        message: String,
        /// Whether the operation can be retried
        retryable: bool,
    },

    /// Payload rejected by the remote store; never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller exceeded a rate limit and must wait
    #[error("Rate limit exceeded; retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the current window rolls over
        retry_after_secs: u64,
    },

    /// A sync session for this owner is already in flight
    #[error("Sync already in progress for owner {0}")]
    SyncInProgress(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Offline | Self::PoorConnection => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::transport_retryable("connection reset").is_retryable());
        assert!(!Error::transport_fatal("bad certificate").is_retryable());
        assert!(Error::Offline.is_retryable());
        assert!(!Error::Validation("payload too large".into()).is_retryable());
        assert!(!Error::RateLimited {
            retry_after_secs: 30
        }
        .is_retryable());
    }

    #[test]
    fn rate_limited_display_includes_retry_after() {
        let err = Error::RateLimited {
            retry_after_secs: 42,
        };
        assert!(err.to_string().contains("42"));
    }
}
