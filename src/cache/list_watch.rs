use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::store::RangeResponse;
use crate::store::RemoteStore;
use crate::store::WatchStream;
use crate::Result;
use crate::StoreError;

/// List-then-watch cursor over one key prefix.
///
/// Tracks the revision the cache is synced to. A revision of 0 means unknown:
/// the next watch must be preceded by a full list.
pub struct PrefixListWatch {
    store: Arc<dyn RemoteStore>,
    prefix: String,
    revision: AtomicI64,
    list_timeout: Duration,
}

impl PrefixListWatch {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        prefix: impl Into<String>,
        list_timeout: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            revision: AtomicI64::new(0),
            list_timeout,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn revision(&self) -> i64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn set_revision(
        &self,
        revision: i64,
    ) {
        self.revision.store(revision, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.set_revision(0);
    }

    /// Full list under the list timeout; records the returned revision.
    pub async fn list(&self) -> Result<RangeResponse> {
        let resp = timeout(self.list_timeout, self.store.list(&self.prefix))
            .await
            .map_err(|_| StoreError::Timeout(self.list_timeout))??;
        self.set_revision(resp.revision);
        debug!(prefix = %self.prefix, revision = resp.revision, count = resp.kvs.len(), "listed");
        Ok(resp)
    }

    /// Watches from the revision after the last one applied.
    pub async fn watch(&self) -> Result<WatchStream> {
        let from = self.revision() + 1;
        debug!(prefix = %self.prefix, from, "start watching");
        self.store.watch(&self.prefix, from).await
    }
}
