//! # Store Adapter
//!
//! Typed interface over the external key/value store. The runtime engine
//! only ever talks to the [`Store`] trait; production wires in
//! [`RedisStore`] (multiplexed connection pool, retry with backoff,
//! sentinel-aware master lookup), tests and local development use
//! [`MemoryStore`].
//!
//! Value records are `(value, timestamp)` pairs; timestamps are UTC
//! microseconds shared across a batch. Batch writes are atomic: either the
//! whole cycle's output becomes visible or none of it does.

pub mod error;
pub mod memory;
pub mod redis;
pub mod retry;
pub mod throttle;

pub use self::redis::RedisStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use retry::RetryPolicy;
pub use throttle::LogThrottle;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// A current sensor reading as stored: value plus write timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub value: f64,
    pub timestamp_us: i64,
}

/// A value to be written. Numbers cover sensors and predicates (booleans
/// are stored as 0/1 upstream); strings pass through set-actions only.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Number(f64),
    Text(String),
}

impl WriteValue {
    /// Wire representation. Float formatting is shortest-round-trip, so a
    /// read-back parses to the identical double.
    pub fn render(&self) -> String {
        match self {
            WriteValue::Number(n) => n.to_string(),
            WriteValue::Text(s) => s.clone(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            WriteValue::Number(n) => Some(*n),
            WriteValue::Text(_) => None,
        }
    }
}

impl fmt::Display for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A host/port pair, as reported by sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The store operations the engine needs. Object-safe so the scheduler can
/// run against Redis or an in-memory double.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read the current values for `keys` in one round trip. Missing or
    /// malformed entries are omitted (and logged, throttled, by the
    /// implementation).
    async fn get_current(&self, keys: &[String]) -> StoreResult<HashMap<String, SensorReading>>;

    /// Persist a batch of writes with a shared timestamp. Atomic: on error
    /// none of the writes are visible.
    async fn set_batch(&self, writes: &[(String, WriteValue)], timestamp_us: i64)
        -> StoreResult<()>;

    /// Publish one message to a channel.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()>;

    /// Recent history for a key, newest last. Backing analytics only; the
    /// sustained-threshold path reads in-memory buffers instead.
    async fn get_historical(&self, key: &str, count: usize) -> StoreResult<Vec<SensorReading>>;

    /// Last health-check verdict. Maintained by a periodic PING task.
    fn is_healthy(&self) -> bool;

    /// Active probe; implementations update their health flag from it.
    async fn ping(&self) -> StoreResult<()>;

    /// The master endpoint the cluster's sentinels currently agree on.
    async fn sentinel_master(&self) -> StoreResult<Endpoint>;

    /// Delete every key under a namespace prefix. Test/maintenance surface;
    /// honors the `input:` / `output:` / `buffer:` conventions.
    async fn clear_prefix(&self, prefix: &str) -> StoreResult<u64>;
}
