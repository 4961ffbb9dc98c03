use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Async task service configuration
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TaskConfig {
    /// Tick of the daemon that reclaims schedulers marked by `defer_remove`
    /// (unit: milliseconds)
    #[serde(default = "default_remove_interval_ms")]
    pub remove_interval_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            remove_interval_ms: default_remove_interval_ms(),
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> Result<()> {
        if self.remove_interval_ms < 10 {
            return Err(Error::Config(ConfigError::Message(format!(
                "task.remove_interval_ms must be at least 10, got {}",
                self.remove_interval_ms
            ))));
        }
        Ok(())
    }

    pub fn remove_interval(&self) -> Duration {
        Duration::from_millis(self.remove_interval_ms)
    }
}

fn default_remove_interval_ms() -> u64 {
    30_000
}
