//! Redis store adapter.
//!
//! Values live in hashes: `HSET <key> value <v> timestamp <ts>`. Batch
//! reads pipeline one HGETALL per key; batch writes go through a MULTI/EXEC
//! pipeline so a cycle's output is all-or-nothing. Optionally each write is
//! mirrored into a capped `buffer:<key>` list for backing analytics.
//!
//! Connections: a fixed pool of multiplexed connections, one picked at
//! random per request. A connection-class failure triggers an inline
//! reconnect of the failed slot; the retry policy then takes another pick.
//! Master discovery asks the configured sentinels in order
//! (`SENTINEL get-master-addr-by-name`), falling back to the primary URL
//! when no sentinels are configured.

use super::error::{StoreError, StoreResult};
use super::retry::RetryPolicy;
use super::throttle::LogThrottle;
use super::{Endpoint, SensorReading, Store, WriteValue};
use crate::config::StoreConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RedisStore {
    client: redis::Client,
    pool: Vec<RwLock<MultiplexedConnection>>,
    healthy: AtomicBool,
    retry: RetryPolicy,
    call_timeout: Duration,
    connect_timeout: Duration,
    health_interval: Duration,
    throttle: LogThrottle,
    sentinels: Vec<String>,
    service_name: String,
    history_depth: usize,
}

impl RedisStore {
    /// Connect the pool. Fails when the first connection cannot be made;
    /// later drops are handled by reconnect-on-error.
    pub async fn connect(cfg: &StoreConfig) -> StoreResult<Self> {
        let client =
            redis::Client::open(cfg.url.as_str()).map_err(StoreError::from_redis)?;
        let connect_timeout = Duration::from_millis(cfg.connect_timeout_ms);

        let mut pool = Vec::with_capacity(cfg.pool_size.max(1));
        for _ in 0..cfg.pool_size.max(1) {
            let conn = open_connection(&client, connect_timeout).await?;
            pool.push(RwLock::new(conn));
        }
        info!(url = %cfg.url, pool = pool.len(), "connected to store");

        Ok(RedisStore {
            client,
            pool,
            healthy: AtomicBool::new(true),
            retry: RetryPolicy::new(
                cfg.retry_count,
                Duration::from_millis(cfg.retry_base_delay_ms),
            ),
            call_timeout: Duration::from_millis(cfg.call_timeout_ms),
            connect_timeout,
            health_interval: Duration::from_millis(cfg.health_check_interval_ms),
            throttle: LogThrottle::new(Duration::from_secs(cfg.error_throttle_window_s)),
            sentinels: cfg.sentinel.endpoints.clone(),
            service_name: cfg.sentinel.service_name.clone(),
            history_depth: cfg.history_depth,
        })
    }

    /// Spawn the periodic PING task maintaining the health flag.
    pub fn start_health_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.ping().await {
                            if store.throttle.should_log("health-ping") {
                                warn!(error = %e, "store health check failed");
                            }
                        }
                    }
                }
            }
        })
    }

    fn pick_slot(&self) -> usize {
        if self.pool.len() <= 1 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.pool.len())
        }
    }

    fn connection(&self, slot: usize) -> MultiplexedConnection {
        self.pool[slot].read().clone()
    }

    /// Replace a slot's connection after a connection-class failure.
    async fn reconnect_slot(&self, slot: usize) {
        match open_connection(&self.client, self.connect_timeout).await {
            Ok(conn) => {
                *self.pool[slot].write() = conn;
                debug!(slot, "reconnected store connection");
            }
            Err(e) => {
                if self.throttle.should_log("reconnect") {
                    warn!(slot, error = %e, "store reconnect failed");
                }
            }
        }
    }

    /// Apply the per-call timeout and error classification, reconnecting
    /// the slot on connection-class failures so the next attempt gets a
    /// fresh connection.
    async fn call<T, Fut>(&self, slot: usize, fut: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let result = tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.call_timeout))
            .and_then(|r| r.map_err(StoreError::from_redis));

        if let Err(e) = &result {
            if e.is_transient() {
                self.reconnect_slot(slot).await;
            }
        }
        result
    }

    async fn get_current_once(
        &self,
        keys: &[String],
    ) -> StoreResult<HashMap<String, SensorReading>> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HGETALL").arg(key);
        }
        let replies: Vec<HashMap<String, String>> =
            self.call(slot, pipe.query_async(&mut conn)).await?;

        let mut out = HashMap::with_capacity(replies.len());
        for (key, fields) in keys.iter().zip(replies) {
            if fields.is_empty() {
                // Key not written yet; normal for outputs early in a run.
                continue;
            }
            match decode_record(&fields) {
                Ok(reading) => {
                    out.insert(key.clone(), reading);
                }
                Err(reason) => {
                    if self.throttle.should_log(&format!("malformed:{key}")) {
                        warn!(key = %key, reason, "skipping malformed store record");
                    }
                }
            }
        }
        Ok(out)
    }

    async fn set_batch_once(
        &self,
        writes: &[(String, WriteValue)],
        timestamp_us: i64,
    ) -> StoreResult<()> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in writes {
            pipe.cmd("HSET")
                .arg(key)
                .arg("value")
                .arg(value.render())
                .arg("timestamp")
                .arg(timestamp_us)
                .ignore();
            if self.history_depth > 0 {
                let entry = format!("{timestamp_us}:{}", value.render());
                pipe.cmd("RPUSH")
                    .arg(format!("buffer:{key}"))
                    .arg(entry)
                    .ignore();
                pipe.cmd("LTRIM")
                    .arg(format!("buffer:{key}"))
                    .arg(-(self.history_depth as i64))
                    .arg(-1)
                    .ignore();
            }
        }
        let _: () = self.call(slot, pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn publish_once(&self, channel: &str, message: &str) -> StoreResult<()> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);
        let _: () = self
            .call(
                slot,
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(message)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn get_historical_once(
        &self,
        key: &str,
        count: usize,
    ) -> StoreResult<Vec<SensorReading>> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);
        let entries: Vec<String> = self
            .call(
                slot,
                redis::cmd("LRANGE")
                    .arg(format!("buffer:{key}"))
                    .arg(-(count as i64))
                    .arg(-1)
                    .query_async(&mut conn),
            )
            .await?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some((ts, value)) = entry.split_once(':') else {
                continue;
            };
            let (Ok(timestamp_us), Ok(value)) = (ts.parse::<i64>(), value.parse::<f64>())
            else {
                continue;
            };
            out.push(SensorReading {
                value,
                timestamp_us,
            });
        }
        Ok(out)
    }

    async fn clear_prefix_once(&self, prefix: &str) -> StoreResult<u64> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .call(
                    slot,
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = self
                    .call(slot, redis::cmd("DEL").arg(&keys).query_async(&mut conn))
                    .await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn sentinel_master_once(&self) -> StoreResult<Endpoint> {
        if self.sentinels.is_empty() {
            // Single-node deployment: the primary URL is the master.
            return endpoint_from_client(&self.client);
        }

        for url in &self.sentinels {
            let client = match redis::Client::open(url.as_str()) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let Ok(mut conn) = open_connection(&client, self.connect_timeout).await else {
                continue;
            };
            let reply: redis::RedisResult<Option<(String, String)>> =
                tokio::time::timeout(
                    self.call_timeout,
                    redis::cmd("SENTINEL")
                        .arg("get-master-addr-by-name")
                        .arg(&self.service_name)
                        .query_async(&mut conn),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(redis::RedisError::from((
                        redis::ErrorKind::IoError,
                        "sentinel query timed out",
                    )))
                });

            if let Ok(Some((host, port))) = reply {
                if let Ok(port) = port.parse::<u16>() {
                    return Ok(Endpoint { host, port });
                }
            }
        }

        Err(StoreError::NoMaster(self.service_name.clone()))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get_current(&self, keys: &[String]) -> StoreResult<HashMap<String, SensorReading>> {
        self.retry.run(|| self.get_current_once(keys)).await
    }

    async fn set_batch(
        &self,
        writes: &[(String, WriteValue)],
        timestamp_us: i64,
    ) -> StoreResult<()> {
        self.retry
            .run(|| self.set_batch_once(writes, timestamp_us))
            .await
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        self.retry.run(|| self.publish_once(channel, message)).await
    }

    async fn get_historical(&self, key: &str, count: usize) -> StoreResult<Vec<SensorReading>> {
        self.retry.run(|| self.get_historical_once(key, count)).await
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    async fn ping(&self) -> StoreResult<()> {
        let slot = self.pick_slot();
        let mut conn = self.connection(slot);
        let result: StoreResult<String> = self
            .call(slot, redis::cmd("PING").query_async(&mut conn))
            .await;
        match result {
            Ok(_) => {
                self.healthy.store(true, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.healthy.store(false, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn sentinel_master(&self) -> StoreResult<Endpoint> {
        self.retry.run(|| self.sentinel_master_once()).await
    }

    async fn clear_prefix(&self, prefix: &str) -> StoreResult<u64> {
        self.retry.run(|| self.clear_prefix_once(prefix)).await
    }
}

async fn open_connection(
    client: &redis::Client,
    timeout: Duration,
) -> StoreResult<MultiplexedConnection> {
    tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
        .map_err(StoreError::from_redis)
}

fn decode_record(fields: &HashMap<String, String>) -> Result<SensorReading, &'static str> {
    let value = fields
        .get("value")
        .ok_or("missing value field")?
        .parse::<f64>()
        .map_err(|_| "value is not a number")?;
    let timestamp_us = fields
        .get("timestamp")
        .map(|t| t.parse::<i64>())
        .transpose()
        .map_err(|_| "timestamp is not an integer")?
        .unwrap_or(0);
    Ok(SensorReading {
        value,
        timestamp_us,
    })
}

fn endpoint_from_client(client: &redis::Client) -> StoreResult<Endpoint> {
    match &client.get_connection_info().addr {
        redis::ConnectionAddr::Tcp(host, port) => Ok(Endpoint {
            host: host.clone(),
            port: *port,
        }),
        redis::ConnectionAddr::TcpTls { host, port, .. } => Ok(Endpoint {
            host: host.clone(),
            port: *port,
        }),
        other => Err(StoreError::Protocol(format!(
            "cannot derive master endpoint from {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_record_parses_value_and_timestamp() {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), "35.5".to_string());
        fields.insert("timestamp".to_string(), "1700000000000000".to_string());
        let reading = decode_record(&fields).unwrap();
        assert_eq!(reading.value, 35.5);
        assert_eq!(reading.timestamp_us, 1700000000000000);
    }

    #[test]
    fn decode_record_rejects_non_numeric_value() {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), "fault".to_string());
        assert!(decode_record(&fields).is_err());
    }

    #[test]
    fn decode_record_tolerates_missing_timestamp() {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), "1".to_string());
        let reading = decode_record(&fields).unwrap();
        assert_eq!(reading.timestamp_us, 0);
    }
}
