use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::store::KeyValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Applied from the initial full list
    Init,
    Create,
    Update,
    Delete,
    /// Watch broke; revision is unknown until the next successful list
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Init => "INIT",
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
            EventType::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revision of a change whose position in the store history is unknown, such
/// as a deletion discovered by a relist. Consumers never deduplicate it.
pub const UNORDERED_REVISION: i64 = -1;

/// One change applied to a collection cache.
///
/// `kv` is the entry as stored in the cache; for `Delete` it is the entry
/// that was removed. `Error` events carry no entry.
#[derive(Debug)]
pub struct CacheEvent<V> {
    pub event_type: EventType,
    pub key: String,
    pub kv: Option<Arc<KeyValue<V>>>,
    pub revision: i64,
}

// Manual impl: cloning only bumps the Arc, V need not be Clone
impl<V> Clone for CacheEvent<V> {
    fn clone(&self) -> Self {
        Self {
            event_type: self.event_type,
            key: self.key.clone(),
            kv: self.kv.clone(),
            revision: self.revision,
        }
    }
}

impl<V> CacheEvent<V> {
    pub fn new(
        event_type: EventType,
        kv: Arc<KeyValue<V>>,
        revision: i64,
    ) -> Self {
        Self {
            event_type,
            key: kv.key.clone(),
            kv: Some(kv),
            revision,
        }
    }

    pub fn error() -> Self {
        Self {
            event_type: EventType::Error,
            key: String::new(),
            kv: None,
            revision: 0,
        }
    }
}

/// Consumer of the events a refresher emits.
///
/// Handlers are invoked sequentially in emission order, so per-key revision
/// order is preserved end to end. A handler must not block indefinitely.
#[async_trait]
pub trait CacheEventHandler<V>: Send + Sync + 'static {
    async fn on_event(
        &self,
        event: CacheEvent<V>,
    );
}
