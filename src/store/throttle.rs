//! Log throttling.
//!
//! Repeated failures (a dead connection, a permanently missing sensor)
//! would otherwise log on every cycle. Each distinct message key logs at
//! most once per window; the default window is 60 seconds.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    last: DashMap<String, Instant>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        LogThrottle {
            window,
            last: DashMap::new(),
        }
    }

    /// True when the caller should emit the log line for `key` now.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.last.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= self.window {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        LogThrottle::new(Duration::from_secs(60))
    }
}
