//! Per-key serialized task execution.
//!
//! [`AsyncTaskService`] runs tasks sharing a key one at a time and in
//! submission order, while tasks of different keys run concurrently. It backs
//! lease keepalive: concurrent heartbeats of one instance must never race two
//! renewals against the remote store.

mod lease;
mod scheduler;
pub use lease::*;
pub use scheduler::*;

#[cfg(test)]
mod scheduler_test;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;
use crate::Result;

/// A unit of work bound to a logical key.
///
/// A task is executed exactly once. Its outcome is retained by the task itself
/// so that it can be read back through
/// [`AsyncTaskService::latest_handled`].
#[async_trait]
pub trait AsyncTask: Send + Sync + 'static {
    fn key(&self) -> &str;

    async fn execute(&self) -> Result<()>;

    /// Error retained by the last `execute`, if it failed
    fn err(&self) -> Option<Arc<Error>>;
}
