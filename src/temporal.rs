//! Temporal buffer service.
//!
//! Per-sensor bounded history for threshold-over-time evaluation. Each
//! sensor owns a fixed-capacity ring of `(timestamp, value)` samples; a
//! sampling policy decouples buffer granularity from the cycle rate, and
//! stale entries are trimmed lazily when a window is read.
//!
//! Buffers are created on a sensor's first sample and live for the life of
//! the runtime. Capacities come from the compiled plan (the validator sizes
//! each temporally-referenced sensor as `ceil(max window / sampling period)
//! + margin`); sensors the plan says nothing about get the default.
//!
//! All operations are sharded per sensor and safe to call concurrently.

use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};

/// One time-stamped reading. Timestamps are UTC microseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalSample {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug)]
struct SensorRing {
    samples: VecDeque<TemporalSample>,
    capacity: usize,
    last_sample_ts: Option<i64>,
}

impl SensorRing {
    fn new(capacity: usize) -> Self {
        SensorRing {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_sample_ts: None,
        }
    }

    fn push(&mut self, sample: TemporalSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.last_sample_ts = Some(sample.timestamp);
    }

    fn trim_before(&mut self, cutoff: i64) {
        while self
            .samples
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
    }
}

/// All per-sensor rings, keyed by sensor.
#[derive(Debug)]
pub struct TemporalBuffers {
    buffers: DashMap<String, SensorRing>,
    capacities: HashMap<String, usize>,
    default_capacity: usize,
    sampling_period_us: i64,
}

impl TemporalBuffers {
    pub fn new(
        sampling_period_ms: u64,
        default_capacity: usize,
        capacities: HashMap<String, usize>,
    ) -> Self {
        TemporalBuffers {
            buffers: DashMap::new(),
            capacities,
            default_capacity: default_capacity.max(1),
            sampling_period_us: (sampling_period_ms as i64).saturating_mul(1000),
        }
    }

    pub fn sampling_period_us(&self) -> i64 {
        self.sampling_period_us
    }

    /// Record a reading. Appends only when at least one sampling period has
    /// passed since the sensor's previous sample; drops otherwise. This caps
    /// buffer growth regardless of how fast cycles run.
    pub fn update(&self, key: &str, value: f64, now_us: i64) {
        let mut ring = self.buffers.entry(key.to_string()).or_insert_with(|| {
            let capacity = self
                .capacities
                .get(key)
                .copied()
                .unwrap_or(self.default_capacity);
            SensorRing::new(capacity)
        });

        let due = match ring.last_sample_ts {
            Some(last) => now_us - last >= self.sampling_period_us,
            None => true,
        };
        if due {
            ring.push(TemporalSample {
                timestamp: now_us,
                value,
            });
        }
    }

    /// Samples with timestamps in `[now - duration, now]`, chronological.
    /// Entries older than the window are trimmed as a side effect.
    pub fn window(&self, key: &str, duration_us: i64, now_us: i64) -> Vec<TemporalSample> {
        let Some(mut ring) = self.buffers.get_mut(key) else {
            return Vec::new();
        };
        let cutoff = now_us - duration_us;
        ring.trim_before(cutoff);
        ring.samples
            .iter()
            .filter(|s| s.timestamp <= now_us)
            .copied()
            .collect()
    }

    /// Number of retained samples for a sensor. Mostly for diagnostics.
    pub fn sample_count(&self, key: &str) -> usize {
        self.buffers.get(key).map_or(0, |r| r.samples.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1000;

    fn buffers(sampling_ms: u64) -> TemporalBuffers {
        TemporalBuffers::new(sampling_ms, 100, HashMap::new())
    }

    #[test]
    fn sampling_policy_drops_fast_updates() {
        let b = buffers(100);
        b.update("s", 1.0, 0);
        b.update("s", 2.0, 50 * MS); // 50 ms later: dropped
        b.update("s", 3.0, 100 * MS); // exactly one period: kept
        assert_eq!(b.sample_count("s"), 2);

        let window = b.window("s", 1000 * MS, 100 * MS);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].value, 1.0);
        assert_eq!(window[1].value, 3.0);
    }

    #[test]
    fn window_is_inclusive_at_both_edges() {
        let b = buffers(100);
        b.update("s", 1.0, 0);
        b.update("s", 2.0, 500 * MS);
        b.update("s", 3.0, 1000 * MS);
        // Window [0, 1000ms]: the sample at exactly now-duration is included.
        let window = b.window("s", 1000 * MS, 1000 * MS);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn stale_samples_trimmed_on_read() {
        let b = buffers(100);
        for i in 0..10 {
            b.update("s", i as f64, i * 100 * MS);
        }
        assert_eq!(b.sample_count("s"), 10);
        // Read a 300 ms window at t=900ms: [600ms, 900ms] = 4 samples.
        let window = b.window("s", 300 * MS, 900 * MS);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].value, 6.0);
        // Older entries were dropped during the read.
        assert_eq!(b.sample_count("s"), 4);
    }

    #[test]
    fn ring_overwrites_oldest_at_capacity() {
        let b = TemporalBuffers::new(100, 3, HashMap::new());
        for i in 0..5 {
            b.update("s", i as f64, i * 100 * MS);
        }
        assert_eq!(b.sample_count("s"), 3);
        let window = b.window("s", 10_000 * MS, 400 * MS);
        assert_eq!(
            window.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn per_sensor_capacity_override() {
        let mut caps = HashMap::new();
        caps.insert("big".to_string(), 5usize);
        let b = TemporalBuffers::new(100, 2, caps);
        for i in 0..10 {
            b.update("big", i as f64, i * 100 * MS);
            b.update("small", i as f64, i * 100 * MS);
        }
        assert_eq!(b.sample_count("big"), 5);
        assert_eq!(b.sample_count("small"), 2);
    }

    #[test]
    fn missing_sensor_has_empty_window() {
        let b = buffers(100);
        assert!(b.window("ghost", 1000 * MS, 0).is_empty());
    }
}
