//! Registry Core Error Hierarchy
//!
//! Errors are grouped by the subsystem that raises them. Backend failures
//! surfaced through a live query keep their [`StoreError`] shape so callers can
//! tell an outage apart from a stale read.

use std::sync::Arc;
use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Remote key-value store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local cache and prefix index failures
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Per-key task scheduler failures
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Publish/subscribe delivery failures
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable (connection refused, leader lost, ...)
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete in time
    #[error("Remote store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Requested revision has been compacted away
    #[error("Revision {requested} has been compacted (compacted revision: {compacted})")]
    Compacted { requested: i64, compacted: i64 },

    /// Requested revision is newer than the store revision
    #[error("Revision {requested} is a future revision (current revision: {current})")]
    FutureRevision { requested: i64, current: i64 },

    #[error("Lease {0} not found")]
    LeaseNotFound(i64),

    /// Watch stream ended on the store side
    #[error("Watch stream closed")]
    WatchClosed,

    /// Watch consumer fell behind and skipped events
    #[error("Watch stream lagged behind by {0} events")]
    WatchLagged(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Key does not belong to the collection the indexer serves
    #[error("Key {key} does not match collection prefix {prefix}")]
    PrefixMismatch { key: String, prefix: String },

    /// Raw bytes could not be decoded into the collection record type
    #[error("Failed to parse value of {key}: {message}")]
    Parse { key: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No scheduler exists for the key, or it has been reclaimed
    #[error("Task scheduler for {0} is expired")]
    Expired(String),

    #[error("Async task service is stopped")]
    ServiceStopped,

    /// Error retained by the latest handled task of a key
    #[error("Latest task for {key} failed: {cause}")]
    Failed { key: String, cause: Arc<Error> },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notify service is closed")]
    ServiceClosed,

    #[error("Unknown notify type")]
    UnknownType,

    /// Bounded queue stayed full for the whole wait window
    #[error("Notify queue for {notify_type} is full, timed out after {timeout:?}")]
    QueueTimeout {
        notify_type: &'static str,
        timeout: Duration,
    },
}

impl Error {
    /// Returns true when the error comes from the remote store itself
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}
