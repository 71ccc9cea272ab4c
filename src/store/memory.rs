//! In-memory store.
//!
//! Behaves like the Redis adapter for everything the engine observes:
//! read-your-write within the process, atomic batches, a sentinel-reported
//! master, prefix clearing. Used by the test suites and handy for running
//! the engine without a server.
//!
//! Test knobs: the master endpoint and health flag are settable, and write
//! failures can be injected to exercise the discard-on-flush-failure path.

use super::error::{StoreError, StoreResult};
use super::{Endpoint, SensorReading, Store, WriteValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A stored record: last written value plus its batch timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub value: WriteValue,
    pub timestamp_us: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, StoredRecord>>,
    history: Mutex<HashMap<String, Vec<SensorReading>>>,
    messages: Mutex<Vec<(String, String)>>,
    healthy: AtomicBool,
    master: Mutex<Option<Endpoint>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            healthy: AtomicBool::new(true),
            ..MemoryStore::default()
        }
    }

    /// Seed a numeric input, the way an ingest pipeline would.
    pub fn insert_number(&self, key: &str, value: f64, timestamp_us: i64) {
        self.data.lock().insert(
            key.to_string(),
            StoredRecord {
                value: WriteValue::Number(value),
                timestamp_us,
            },
        );
    }

    /// The raw record for a key, if present.
    pub fn record(&self, key: &str) -> Option<StoredRecord> {
        self.data.lock().get(key).cloned()
    }

    /// Numeric view of a key's value.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.record(key).and_then(|r| r.value.as_number())
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    pub fn set_master(&self, endpoint: Endpoint) {
        *self.master.lock() = Some(endpoint);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make subsequent batch writes fail without applying anything.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn key_count(&self) -> usize {
        self.data.lock().len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_current(&self, keys: &[String]) -> StoreResult<HashMap<String, SensorReading>> {
        if !self.is_healthy() {
            return Err(StoreError::Connection("store marked unhealthy".into()));
        }
        let data = self.data.lock();
        let mut out = HashMap::new();
        for key in keys {
            if let Some(record) = data.get(key) {
                if let Some(value) = record.value.as_number() {
                    out.insert(
                        key.clone(),
                        SensorReading {
                            value,
                            timestamp_us: record.timestamp_us,
                        },
                    );
                }
            }
        }
        Ok(out)
    }

    async fn set_batch(
        &self,
        writes: &[(String, WriteValue)],
        timestamp_us: i64,
    ) -> StoreResult<()> {
        if !self.is_healthy() || self.fail_writes.load(Ordering::SeqCst) {
            // Nothing applied: the batch is all-or-nothing.
            return Err(StoreError::Connection("write failure".into()));
        }
        let mut data = self.data.lock();
        let mut history = self.history.lock();
        for (key, value) in writes {
            data.insert(
                key.clone(),
                StoredRecord {
                    value: value.clone(),
                    timestamp_us,
                },
            );
            if let Some(number) = value.as_number() {
                history.entry(key.clone()).or_default().push(SensorReading {
                    value: number,
                    timestamp_us,
                });
            }
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        if !self.is_healthy() {
            return Err(StoreError::Connection("store marked unhealthy".into()));
        }
        self.messages
            .lock()
            .push((channel.to_string(), message.to_string()));
        Ok(())
    }

    async fn get_historical(&self, key: &str, count: usize) -> StoreResult<Vec<SensorReading>> {
        let history = self.history.lock();
        let entries = history.get(key).cloned().unwrap_or_default();
        let skip = entries.len().saturating_sub(count);
        Ok(entries.into_iter().skip(skip).collect())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(StoreError::Connection("store marked unhealthy".into()))
        }
    }

    async fn sentinel_master(&self) -> StoreResult<Endpoint> {
        self.master
            .lock()
            .clone()
            .ok_or_else(|| StoreError::NoMaster("memory".into()))
    }

    async fn clear_prefix(&self, prefix: &str) -> StoreResult<u64> {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|key, _| !key.starts_with(prefix));
        Ok((before - data.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_your_write() {
        let store = MemoryStore::new();
        store
            .set_batch(&[("output:x".into(), WriteValue::Number(2.5))], 100)
            .await
            .unwrap();
        let current = store
            .get_current(&["output:x".to_string()])
            .await
            .unwrap();
        assert_eq!(current["output:x"].value, 2.5);
        assert_eq!(current["output:x"].timestamp_us, 100);
    }

    #[tokio::test]
    async fn injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        store.insert_number("output:x", 1.0, 0);
        store.fail_writes(true);
        let result = store
            .set_batch(
                &[
                    ("output:x".into(), WriteValue::Number(2.0)),
                    ("output:y".into(), WriteValue::Number(3.0)),
                ],
                100,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.number("output:x"), Some(1.0));
        assert_eq!(store.number("output:y"), None);
    }

    #[tokio::test]
    async fn clear_prefix_respects_namespaces() {
        let store = MemoryStore::new();
        store.insert_number("input:a", 1.0, 0);
        store.insert_number("output:b", 2.0, 0);
        store.insert_number("output:c", 3.0, 0);
        let removed = store.clear_prefix("output:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn historical_returns_newest_tail() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .set_batch(&[("output:x".into(), WriteValue::Number(i as f64))], i)
                .await
                .unwrap();
        }
        let tail = store.get_historical("output:x", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].value, 3.0);
        assert_eq!(tail[1].value, 4.0);
    }
}
