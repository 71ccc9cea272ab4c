//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.yaml (default configuration)
//! - config.local.yaml (git-ignored local overrides)
//! - Environment variables (RULEFLOW_* prefix)
//!
//! ## Example
//!
//! ```yaml
//! # config.yaml
//! version: 1
//! engine:
//!   cycle_time_ms: 100
//!   sampling_period_ms: 100
//! valid_sensors:
//!   - input:temperature
//!   - input:humidity
//! store:
//!   url: redis://127.0.0.1:6379
//!   sentinel:
//!     endpoints: [ "redis://127.0.0.1:26379" ]
//!     service_name: mymaster
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! RULEFLOW_ENGINE__CYCLE_TIME_MS=50
//! RULEFLOW_STORE__URL=redis://10.0.0.5:6379
//! ```

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::analysis::GroupBudgets;
use crate::validator::ValidatorOptions;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Config schema version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Sensors the rule documents may reference as external inputs
    #[serde(default)]
    pub valid_sensors: Vec<String>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub ha: HaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cycle evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cycle cadence in milliseconds
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Minimum spacing between temporal buffer samples
    #[serde(default = "default_sampling_period_ms")]
    pub sampling_period_ms: u64,

    /// Default ring capacity for sensors without temporal conditions
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Extra ring slots on top of the computed requirement
    #[serde(default = "default_buffer_margin")]
    pub buffer_margin: usize,

    /// Maximum samples a single temporal window may require
    #[serde(default = "default_max_temporal_points")]
    pub max_temporal_points: usize,

    /// Number of worker threads for group-internal rule evaluation
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub worker_threads: usize,

    /// Grouping budget: rules per emitted group
    #[serde(default = "default_max_rules_per_group")]
    pub max_rules_per_group: usize,

    /// Grouping budget: estimated rendered lines per emitted group
    #[serde(default = "default_max_lines_per_group")]
    pub max_lines_per_group: usize,
}

/// Store adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Primary endpoint, used when no sentinels are configured
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Multiplexed connections kept in the pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-call timeout, distinct from the connection timeout
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Transient-error retries per call
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base delay for exponential backoff (base * 2^k)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// PING cadence for the health check task
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Repeated-log suppression window
    #[serde(default = "default_error_throttle_window_s")]
    pub error_throttle_window_s: u64,

    /// Entries kept per key in the `buffer:` history lists (0 = disabled)
    #[serde(default)]
    pub history_depth: usize,

    #[serde(default)]
    pub sentinel: SentinelConfig,
}

/// Sentinel endpoints for master discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Sentinel endpoints, tried in order
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Monitored master name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

/// Active/standby state management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// This engine's host identifier; defaults to the OS hostname
    #[serde(default)]
    pub host: Option<String>,

    /// Sentinel/health poll cadence
    #[serde(default = "default_state_check_interval_ms")]
    pub state_check_interval_ms: u64,

    /// Store unhealthy for longer than this forces inactive
    #[serde(default = "default_unhealthy_window_ms")]
    pub unhealthy_window_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_cycle_time_ms() -> u64 { 100 }
fn default_sampling_period_ms() -> u64 { 100 }
fn default_buffer_capacity() -> usize { 100 }
fn default_buffer_margin() -> usize { 10 }
fn default_max_temporal_points() -> usize { 1000 }
fn default_max_rules_per_group() -> usize { 25 }
fn default_max_lines_per_group() -> usize { 400 }
fn default_store_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_pool_size() -> usize { 5 }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_call_timeout_ms() -> u64 { 1000 }
fn default_retry_count() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 100 }
fn default_health_check_interval_ms() -> u64 { 1000 }
fn default_error_throttle_window_s() -> u64 { 60 }
fn default_service_name() -> String { "mymaster".to_string() }
fn default_state_check_interval_ms() -> u64 { 100 }
fn default_unhealthy_window_ms() -> u64 { 30000 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.yaml (base configuration)
    /// 2. config.local.yaml (local overrides, git-ignored)
    /// 3. Environment variables (RULEFLOW_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file("config.yaml"))
            .merge(Yaml::file("config.local.yaml"))
            .merge(Env::prefixed("RULEFLOW_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("RULEFLOW_").split("__"))
            .extract()
    }

    /// Validator tunables derived from this config
    pub fn validator_options(&self) -> ValidatorOptions {
        ValidatorOptions {
            valid_sensors: self.valid_sensors.clone(),
            sampling_period_ms: self.engine.sampling_period_ms,
            max_temporal_points: self.engine.max_temporal_points,
            default_buffer_capacity: self.engine.buffer_capacity,
            buffer_margin: self.engine.buffer_margin,
        }
    }

    /// Grouping budgets derived from this config
    pub fn group_budgets(&self) -> GroupBudgets {
        GroupBudgets {
            max_rules_per_group: self.engine.max_rules_per_group,
            max_lines_per_group: self.engine.max_lines_per_group,
        }
    }

    /// The host identifier used for active/standby comparison
    pub fn host_id(&self) -> String {
        if let Some(host) = &self.ha.host {
            return host.clone();
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: default_version(),
            valid_sensors: Vec::new(),
            engine: EngineConfig::default(),
            store: StoreConfig::default(),
            ha: HaConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cycle_time_ms: default_cycle_time_ms(),
            sampling_period_ms: default_sampling_period_ms(),
            buffer_capacity: default_buffer_capacity(),
            buffer_margin: default_buffer_margin(),
            max_temporal_points: default_max_temporal_points(),
            worker_threads: 0, // 0 = use all available CPU cores
            max_rules_per_group: default_max_rules_per_group(),
            max_lines_per_group: default_max_lines_per_group(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            url: default_store_url(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            error_throttle_window_s: default_error_throttle_window_s(),
            history_depth: 0,
            sentinel: SentinelConfig::default(),
        }
    }
}

impl Default for HaConfig {
    fn default() -> Self {
        HaConfig {
            host: None,
            state_check_interval_ms: default_state_check_interval_ms(),
            unhealthy_window_ms: default_unhealthy_window_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.cycle_time_ms, 100);
        assert_eq!(config.store.pool_size, 5);
        assert_eq!(config.store.call_timeout_ms, 1000);
        assert_eq!(config.store.connect_timeout_ms, 5000);
        assert_eq!(config.ha.state_check_interval_ms, 100);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("engine:"));
        assert!(yaml.contains("store:"));
        assert!(yaml.contains("sentinel:"));
    }

    #[test]
    fn test_validator_options_derivation() {
        let mut config = Config::default();
        config.valid_sensors = vec!["input:temperature".into()];
        config.engine.sampling_period_ms = 50;
        let opts = config.validator_options();
        assert_eq!(opts.sampling_period_ms, 50);
        assert_eq!(opts.valid_sensors, vec!["input:temperature".to_string()]);
    }

    #[test]
    fn test_host_override() {
        let mut config = Config::default();
        config.ha.host = Some("engine-a".into());
        assert_eq!(config.host_id(), "engine-a");
    }
}
