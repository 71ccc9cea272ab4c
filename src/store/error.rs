//! Store Adapter Error Types

use std::time::Duration;
use thiserror::Error;

/// Store adapter errors.
///
/// The transient/permanent split drives the retry policy: connection drops
/// and timeouts are retried with backoff, everything else surfaces
/// immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection could not be established or was lost
    #[error("store connection error: {0}")]
    Connection(String),

    /// A call exceeded its per-call timeout
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with something unexpected
    #[error("store protocol error: {0}")]
    Protocol(String),

    /// No configured sentinel reported a master
    #[error("no sentinel reported a master for service '{0}'")]
    NoMaster(String),

    /// A stored record could not be decoded
    #[error("malformed record for key '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    /// Whether the retry policy should have another go.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }

    /// Classify a redis-rs error into the adapter taxonomy.
    pub(crate) fn from_redis(e: redis::RedisError) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout(Duration::ZERO)
        } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
