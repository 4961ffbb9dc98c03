use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Prefix tree over the keys of one collection.
///
/// For every key `/a/b/c` under the root `/a/`, the node `/a/b/` holds `c`'s
/// full key and the node `/a/` holds `/a/b/`. A node exists iff at least one
/// key below it exists. Nothing above the root is ever indexed.
#[derive(Debug)]
pub struct PrefixIndex {
    root: String,
    init_size: usize,
    nodes: HashMap<String, HashSet<String>>,
}

/// Parent prefix of a key or prefix: `/a/b/c` and `/a/b/c/` both map to
/// `/a/b/`. Returns `None` at the top of the hierarchy.
pub(crate) fn parent_prefix(key: &str) -> Option<&str> {
    if key.len() < 2 {
        return None;
    }
    let idx = key[..key.len() - 1].rfind('/')?;
    Some(&key[..=idx])
}

impl PrefixIndex {
    pub fn new(
        root: impl Into<String>,
        init_size: usize,
    ) -> Self {
        Self {
            root: root.into(),
            init_size,
            nodes: HashMap::with_capacity(init_size),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Number of prefix nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_prefix(
        &self,
        prefix: &str,
    ) -> bool {
        self.nodes.contains_key(prefix)
    }

    /// Indexes `key`, creating missing ancestors up to the root.
    pub fn add_key(
        &mut self,
        key: &str,
    ) {
        if !key.starts_with(&self.root) {
            return;
        }
        let mut child = key.to_string();
        while let Some(parent) = parent_prefix(&child) {
            if parent.len() < self.root.len() {
                break;
            }
            let parent = parent.to_string();
            let existed = self.nodes.contains_key(&parent);
            self.nodes.entry(parent.clone()).or_default().insert(child);
            if existed || parent == self.root {
                break;
            }
            child = parent;
        }
    }

    /// Unindexes `key` and every ancestor it leaves empty, root included.
    pub fn delete_key(
        &mut self,
        key: &str,
    ) {
        if !key.starts_with(&self.root) {
            return;
        }
        let mut child = key.to_string();
        while let Some(parent) = parent_prefix(&child) {
            if parent.len() < self.root.len() {
                break;
            }
            let parent = parent.to_string();
            let Some(children) = self.nodes.get_mut(&parent) else {
                break;
            };
            children.remove(&child);
            if !children.is_empty() {
                break;
            }
            self.nodes.remove(&parent);
            if parent == self.root {
                break;
            }
            child = parent;
        }
    }

    /// Every live key below `prefix`, sorted.
    pub fn get_keys(
        &self,
        prefix: &str,
    ) -> Vec<String> {
        let mut keys = Vec::new();
        let mut pending = vec![prefix];
        while let Some(node) = pending.pop() {
            let Some(children) = self.nodes.get(node) else {
                continue;
            };
            for child in children {
                if child.ends_with('/') {
                    pending.push(child.as_str());
                } else {
                    keys.push(child.clone());
                }
            }
        }
        keys.sort_unstable();
        keys
    }

    pub fn count(
        &self,
        prefix: &str,
    ) -> usize {
        self.get_keys(prefix).len()
    }

    /// Rebuilds the map with tight capacity; query results are unchanged.
    pub fn compact(&mut self) {
        let capacity = self.nodes.len().max(self.init_size);
        let mut nodes = HashMap::with_capacity(capacity);
        for (prefix, children) in self.nodes.drain() {
            let mut set = HashSet::with_capacity(children.len());
            set.extend(children);
            nodes.insert(prefix, set);
        }
        self.nodes = nodes;
    }
}

/// Decides when the build worker may compact the prefix index.
///
/// Compaction is armed once the index has grown to `init_size * compact_times`
/// nodes, and fires when it has shrunk back to at most `init_size` nodes and
/// `interval` has passed since the previous compaction.
#[derive(Debug)]
pub(crate) struct CompactionGate {
    init_size: usize,
    compact_times: usize,
    interval: Duration,
    peak: usize,
    last_compacted: Instant,
}

impl CompactionGate {
    pub(crate) fn new(
        init_size: usize,
        compact_times: usize,
        interval: Duration,
    ) -> Self {
        Self {
            init_size,
            compact_times,
            interval,
            peak: 0,
            last_compacted: Instant::now(),
        }
    }

    /// Records the current size; returns true when a compaction is due.
    pub(crate) fn observe(
        &mut self,
        len: usize,
        now: Instant,
    ) -> bool {
        self.peak = self.peak.max(len);
        self.init_size >= len
            && self.peak >= self.init_size.saturating_mul(self.compact_times)
            && now.duration_since(self.last_compacted) >= self.interval
    }

    pub(crate) fn compacted(
        &mut self,
        len: usize,
        now: Instant,
    ) {
        self.peak = len;
        self.last_compacted = now;
    }
}
