use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.base_delay_ms must be greater than 0"
            ))));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.max_delay_ms {} is less than base_delay_ms {}",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_retries == 0
    }
}

/// Divide strategies by background loop
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Refresher relist after a broken watch; never abandoned
    #[serde(default = "default_relist")]
    pub relist: BackoffPolicy,

    // Lease renewal issued by heartbeat tasks
    #[serde(default = "default_lease_renew")]
    pub lease_renew: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            relist: default_relist(),
            lease_renew: default_lease_renew(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.relist.validate("relist")?;
        self.lease_renew.validate("lease_renew")?;

        if !self.relist.is_unlimited() {
            return Err(Error::Config(ConfigError::Message(
                "retry.relist.max_retries must be 0 (unlimited)".into(),
            )));
        }
        Ok(())
    }
}

fn default_relist() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 30_000,
        base_delay_ms: 500,
        max_delay_ms: 30_000,
    }
}
fn default_lease_renew() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 1,
        timeout_ms: 5_000,
        base_delay_ms: 100,
        max_delay_ms: 1000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
