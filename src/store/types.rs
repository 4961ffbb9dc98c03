use bytes::Bytes;

/// A revisioned key-value pair.
///
/// A newer `mod_revision` for the same key supersedes the older one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyValue<V> {
    pub key: String,
    pub value: V,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    pub lease: i64,
}

/// Key-value pair as it comes off the wire
pub type RawKeyValue = KeyValue<Bytes>;

impl<V> KeyValue<V> {
    /// Rebinds the metadata of this pair to another value
    pub fn with_value<U>(
        &self,
        value: U,
    ) -> KeyValue<U> {
        KeyValue {
            key: self.key.clone(),
            value,
            create_revision: self.create_revision,
            mod_revision: self.mod_revision,
            version: self.version,
            lease: self.lease,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub key: String,
    pub prefix: bool,
    pub count_only: bool,
    pub key_only: bool,
    /// 0 reads the latest revision
    pub revision: i64,
    /// Negative disables pagination
    pub offset: i64,
    /// 0 or negative means unlimited
    pub limit: i64,
}

impl Default for RangeRequest {
    fn default() -> Self {
        Self {
            key: String::new(),
            prefix: false,
            count_only: false,
            key_only: false,
            revision: 0,
            offset: -1,
            limit: 0,
        }
    }
}

impl RangeRequest {
    pub fn point(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key: prefix.into(),
            prefix: true,
            ..Default::default()
        }
    }

    pub fn matches(
        &self,
        key: &str,
    ) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    pub kvs: Vec<RawKeyValue>,
    pub count: i64,
    /// Store revision the read was served at
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// One change inside a watch batch.
///
/// For `Delete`, `kv.value` is empty and `kv.mod_revision` is the revision of
/// the delete.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub kv: RawKeyValue,
}

/// Batch of changes committed at one store revision
#[derive(Debug, Clone)]
pub struct WatchResponse {
    pub revision: i64,
    pub events: Vec<WatchEvent>,
}
