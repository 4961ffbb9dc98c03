//! Watch-driven cache and prefix indexer.
//!
//! ```text
//! RemoteStore ──list/watch──► KvCacher ──put/remove──► KvCache
//!                                │
//!                                └─ CacheEvent ─► PrefixBuildHandler ─► build worker ─► PrefixIndex
//!                                              └► extra handlers (e.g. instance notifications)
//! ```
//!
//! [`CacheIndexer::search`] reads the cache and the index, and falls back to
//! the remote store when they cannot answer.

mod cacher;
mod event;
mod indexer;
mod kv_cache;
mod list_watch;
mod parser;
mod prefix_index;
pub use cacher::*;
pub use event::*;
pub use indexer::*;
pub use kv_cache::*;
pub use list_watch::*;
pub use parser::*;
pub use prefix_index::*;

#[cfg(test)]
mod cacher_test;
#[cfg(test)]
mod prefix_index_test;
