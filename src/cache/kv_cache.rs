use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::store::KeyValue;

/// Read side of a collection cache.
///
/// Only the watch refresher mutates a cache; every other component reads it
/// through this trait.
pub trait CacheReader<V>: Send + Sync {
    fn name(&self) -> &str;

    fn get(
        &self,
        key: &str,
    ) -> Option<Arc<KeyValue<V>>>;

    fn have(
        &self,
        key: &str,
    ) -> bool;

    /// Iterates a point-in-time snapshot; stops early when `f` returns false.
    fn for_each(
        &self,
        f: &mut dyn FnMut(&str, &Arc<KeyValue<V>>) -> bool,
    );

    fn size(&self) -> usize;

    /// True while the cached content may be stale (after a watch failure and
    /// before the next successful list)
    fn dirty(&self) -> bool;
}

/// Result of applying one change to the cache
#[derive(Debug)]
pub(crate) enum ApplyOutcome<V> {
    Created,
    Updated,
    /// Entry was removed; carries the removed entry
    Removed(Arc<KeyValue<V>>),
    /// Change is older than (or as old as) the cached entry and was rejected
    Stale,
    /// Delete for a key the cache does not hold
    Missing,
}

/// In-memory mirror of one key prefix
#[derive(Debug)]
pub struct KvCache<V> {
    name: String,
    prefix: String,
    entries: RwLock<HashMap<String, Arc<KeyValue<V>>>>,
    dirty: AtomicBool,
}

impl<V> KvCache<V> {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        init_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            entries: RwLock::new(HashMap::with_capacity(init_size)),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Inserts or replaces an entry unless the cached one is at least as new.
    pub(crate) fn put(
        &self,
        kv: Arc<KeyValue<V>>,
    ) -> ApplyOutcome<V> {
        let mut entries = self.entries.write();
        match entries.get(&kv.key) {
            Some(prev) if prev.mod_revision >= kv.mod_revision => {
                debug!(
                    name = %self.name,
                    key = %kv.key,
                    cached = prev.mod_revision,
                    incoming = kv.mod_revision,
                    "reject stale put"
                );
                ApplyOutcome::Stale
            }
            Some(_) => {
                entries.insert(kv.key.clone(), kv);
                ApplyOutcome::Updated
            }
            None => {
                entries.insert(kv.key.clone(), kv);
                ApplyOutcome::Created
            }
        }
    }

    /// Removes an entry if the delete at `revision` is newer than it.
    pub(crate) fn remove(
        &self,
        key: &str,
        revision: i64,
    ) -> ApplyOutcome<V> {
        let mut entries = self.entries.write();
        match entries.get(key) {
            None => ApplyOutcome::Missing,
            Some(prev) if prev.mod_revision >= revision => {
                debug!(
                    name = %self.name,
                    key = %key,
                    cached = prev.mod_revision,
                    incoming = revision,
                    "reject stale delete"
                );
                ApplyOutcome::Stale
            }
            Some(_) => match entries.remove(key) {
                Some(prev) => ApplyOutcome::Removed(prev),
                None => ApplyOutcome::Missing,
            },
        }
    }

    /// Snapshot of every cached key
    pub(crate) fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::SeqCst);
    }

    /// Drops every entry and marks the cache dirty
    pub fn clear(&self) {
        self.entries.write().clear();
        self.mark_dirty();
    }
}

impl<V: Send + Sync> CacheReader<V> for KvCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        key: &str,
    ) -> Option<Arc<KeyValue<V>>> {
        self.entries.read().get(key).cloned()
    }

    fn have(
        &self,
        key: &str,
    ) -> bool {
        self.entries.read().contains_key(key)
    }

    fn for_each(
        &self,
        f: &mut dyn FnMut(&str, &Arc<KeyValue<V>>) -> bool,
    ) {
        let snapshot: Vec<(String, Arc<KeyValue<V>>)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, kv) in &snapshot {
            if !f(key, kv) {
                break;
            }
        }
    }

    fn size(&self) -> usize {
        self.entries.read().len()
    }

    fn dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }
}
