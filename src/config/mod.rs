//! Configuration management for the registry core.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`REGISTRY__` prefix)
//! - Component-wise validation
mod cache;
mod notify;
mod retry;
mod task;
pub use cache::*;
pub use notify::*;
pub use retry::*;
pub use task::*;
#[cfg(test)]
mod notify_test;
#[cfg(test)]
mod retry_test;

use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

pub(crate) const ENV_PREFIX: &str = "REGISTRY";

/// Main configuration container for the registry core components
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RegistryConfig {
    /// Cache, prefix index and refresher parameters
    #[serde(default)]
    pub cache: CacheConfig,
    /// Notify service queues and timeouts
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Per-key async task scheduler parameters
    #[serde(default)]
    pub task: TaskConfig,
    /// Retry policies for background recovery loops
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl RegistryConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `REGISTRY__` prefix (highest priority)
    ///
    /// # Note
    /// This method does NOT validate the configuration. Callers MUST call `validate()`
    /// before using the configuration.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("REGISTRY__CACHE__INIT_SIZE", "500");
    /// let cfg = RegistryConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// Consumes self and performs validation of all subsystems. Must be called
    /// after all configuration overrides.
    pub fn validate(self) -> Result<Self> {
        self.cache.validate()?;
        self.notify.validate()?;
        self.task.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
