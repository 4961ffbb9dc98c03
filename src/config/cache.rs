use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Cache, prefix index and watch refresher configuration
///
/// ```toml
/// [cache]
/// enabled = true
/// init_size = 100
/// compact_times = 2
/// compact_interval_ms = 300000
/// ```
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CacheConfig {
    /// Serve reads from the local mirror
    ///
    /// When `false` every search is sent straight to the remote store, but the
    /// refresher still runs so that change events keep flowing.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Initial capacity of each collection's prefix index
    ///
    /// Also the baseline for compaction: the index is rebuilt only after it
    /// has grown to `init_size * compact_times` and shrunk back under `init_size`.
    #[serde(default = "default_init_size")]
    pub init_size: usize,

    /// Capacity of the bounded queue feeding the prefix build worker
    #[serde(default = "default_build_queue_size")]
    pub build_queue_size: usize,

    /// How long a cache event may wait for room in the build queue before
    /// being dropped (unit: milliseconds)
    #[serde(default = "default_build_queue_timeout_ms")]
    pub build_queue_timeout_ms: u64,

    /// Growth multiple of `init_size` that arms compaction
    #[serde(default = "default_compact_times")]
    pub compact_times: usize,

    /// Minimum time between two compactions (unit: milliseconds)
    #[serde(default = "default_compact_interval_ms")]
    pub compact_interval_ms: u64,

    /// Bound of a single full list against the remote store (unit: milliseconds)
    #[serde(default = "default_list_timeout_ms")]
    pub list_timeout_ms: u64,

    /// Period of the cache size metrics reporter (unit: milliseconds)
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            init_size: default_init_size(),
            build_queue_size: default_build_queue_size(),
            build_queue_timeout_ms: default_build_queue_timeout_ms(),
            compact_times: default_compact_times(),
            compact_interval_ms: default_compact_interval_ms(),
            list_timeout_ms: default_list_timeout_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.init_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache.init_size must be greater than 0".into(),
            )));
        }

        if self.build_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache.build_queue_size must be greater than 0".into(),
            )));
        }

        if self.compact_times < 2 {
            return Err(Error::Config(ConfigError::Message(format!(
                "cache.compact_times must be at least 2, got {}",
                self.compact_times
            ))));
        }

        if self.list_timeout_ms == 0 || self.build_queue_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache list and build queue timeouts must be at least 1ms".into(),
            )));
        }

        if self.metrics_interval_ms < 100 {
            return Err(Error::Config(ConfigError::Message(format!(
                "cache.metrics_interval_ms must be at least 100, got {}",
                self.metrics_interval_ms
            ))));
        }

        Ok(())
    }

    pub fn build_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.build_queue_timeout_ms)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_millis(self.compact_interval_ms)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

fn default_enabled() -> bool {
    true
}
fn default_init_size() -> usize {
    100
}
fn default_build_queue_size() -> usize {
    1000
}
fn default_build_queue_timeout_ms() -> u64 {
    5_000
}
fn default_compact_times() -> usize {
    2
}
fn default_compact_interval_ms() -> u64 {
    300_000
}
fn default_list_timeout_ms() -> u64 {
    30_000
}
fn default_metrics_interval_ms() -> u64 {
    30_000
}
