use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::CacheError;
use crate::Result;

/// Turns the raw bytes of a stored value into the collection record type
pub trait Parser<V>: Send + Sync + 'static {
    fn parse(
        &self,
        key: &str,
        raw: &Bytes,
    ) -> Result<V>;
}

/// JSON document parser
pub struct JsonParser<T>(PhantomData<fn() -> T>);

impl<T> JsonParser<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Parser<T> for JsonParser<T>
where
    T: DeserializeOwned + 'static,
{
    fn parse(
        &self,
        key: &str,
        raw: &Bytes,
    ) -> Result<T> {
        serde_json::from_slice(raw).map_err(|e| {
            CacheError::Parse {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Keeps values as opaque bytes
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesParser;

impl Parser<Bytes> for BytesParser {
    fn parse(
        &self,
        _key: &str,
        raw: &Bytes,
    ) -> Result<Bytes> {
        Ok(raw.clone())
    }
}
