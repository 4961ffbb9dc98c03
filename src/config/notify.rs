use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Notify service configuration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotifyConfig {
    /// Capacity of each notify type's job queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Capacity of each subscriber's delivery channel
    #[serde(default = "default_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,

    /// Maximum wait for room in a type queue before `publish` drops the job
    /// (unit: milliseconds)
    #[serde(default = "default_add_timeout_ms")]
    pub add_timeout_ms: u64,

    /// Maximum wait for a subscriber's initial sync, and for room in its
    /// delivery channel (unit: milliseconds)
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            subscriber_buffer_size: default_subscriber_buffer_size(),
            add_timeout_ms: default_add_timeout_ms(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl NotifyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_size == 0 || self.subscriber_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "notify queue sizes must be greater than 0".into(),
            )));
        }

        if self.add_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "notify.add_timeout_ms must be at least 1ms".into(),
            )));
        }

        if self.notify_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "notify.notify_timeout_ms must be at least 1ms".into(),
            )));
        }

        Ok(())
    }

    pub fn add_timeout(&self) -> Duration {
        Duration::from_millis(self.add_timeout_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

fn default_queue_size() -> usize {
    5000
}
fn default_subscriber_buffer_size() -> usize {
    1000
}
fn default_add_timeout_ms() -> u64 {
    1000
}
fn default_notify_timeout_ms() -> u64 {
    1000
}
