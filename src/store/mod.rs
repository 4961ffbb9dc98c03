//! Remote key-value store boundary.
//!
//! The registry never talks to a concrete backend driver directly. Everything
//! it needs from the strongly-consistent store is captured by [`RemoteStore`]:
//! revisioned range reads, writes, an ordered prefix watch and lease
//! primitives. [`MemStore`] is an in-process implementation used by tests and
//! embedders without a real backend.

mod mem_store;
mod types;
pub use mem_store::*;
pub use types::*;


use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Ordered stream of revisioned change batches for one prefix.
///
/// An `Err` item is terminal: the consumer must relist before watching again.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchResponse>> + Send>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Point or prefix read.
    ///
    /// `revision > 0` reads at that revision, `offset`/`limit` paginate. The
    /// response `count` is the number of matching keys before pagination.
    async fn range(
        &self,
        request: RangeRequest,
    ) -> Result<RangeResponse>;

    /// Full list of every key under `prefix` at the current revision.
    async fn list(
        &self,
        prefix: &str,
    ) -> Result<RangeResponse>;

    /// Returns the revision of the write.
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        lease: i64,
    ) -> Result<i64>;

    /// Returns the revision of the delete, or the current revision if the key
    /// did not exist.
    async fn delete(
        &self,
        key: &str,
    ) -> Result<i64>;

    /// Watches every key under `prefix`, starting at `from_revision`.
    ///
    /// Fails with `StoreError::Compacted` when `from_revision` is no longer
    /// retained.
    async fn watch(
        &self,
        prefix: &str,
        from_revision: i64,
    ) -> Result<WatchStream>;

    /// Grants a lease and returns its id.
    async fn lease_grant(
        &self,
        ttl: i64,
    ) -> Result<i64>;

    /// Keeps a lease alive and returns its TTL in seconds.
    async fn lease_renew(
        &self,
        lease_id: i64,
    ) -> Result<i64>;

    /// Revokes a lease, deleting every key attached to it.
    async fn lease_revoke(
        &self,
        lease_id: i64,
    ) -> Result<()>;
}
