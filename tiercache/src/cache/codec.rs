//! Conversion between cached values and their byte representation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Stored bytes could not be turned back into a value
    #[error("failed to decode cached bytes: {0}")]
    Decode(String),

    /// A value could not be turned into bytes
    #[error("failed to encode value: {0}")]
    Encode(String),

    /// The codec only decodes
    #[error("codec does not support encoding")]
    EncodingUnsupported,
}

/// Bidirectional transform between a value and bytes.
///
/// Used by [`TwoLevelCache`](crate::cache::TwoLevelCache) to store values of
/// type `V` in the disk tier. A codec that returns `false` from
/// [`supports_encoding`](Codec::supports_encoding) makes the two-level cache
/// read-through only: new values stay in memory and are never written to disk.
pub trait Codec<V>: Send + Sync {
    /// Rebuild a value from bytes read off disk.
    fn decode(&self, bytes: Vec<u8>) -> Result<V, CodecError>;

    /// Serialize a value for the disk tier.
    ///
    /// Codecs whose values already are bytes can return them borrowed.
    fn encode<'v>(&self, value: &'v V) -> Result<Cow<'v, [u8]>, CodecError>;

    /// Whether [`encode`](Codec::encode) is usable.
    fn supports_encoding(&self) -> bool {
        true
    }

    /// Cost charged against the memory tier's budget for `value`.
    fn cost(&self, _value: &V) -> usize {
        1
    }
}

/// Identity codec for raw byte buffers; cost is the buffer length.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec<Vec<u8>> for BytesCodec {
    fn decode(&self, bytes: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(bytes)
    }

    fn encode<'v>(&self, value: &'v Vec<u8>) -> Result<Cow<'v, [u8]>, CodecError> {
        Ok(Cow::Borrowed(value))
    }

    fn cost(&self, value: &Vec<u8>) -> usize {
        value.len()
    }
}

/// JSON codec for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn decode(&self, bytes: Vec<u8>) -> Result<T, CodecError> {
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode<'v>(&self, value: &'v T) -> Result<Cow<'v, [u8]>, CodecError> {
        serde_json::to_vec(value)
            .map(Cow::Owned)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// Wraps a codec and disables encoding.
#[derive(Debug, Clone, Default)]
pub struct DecodeOnly<C>(pub C);

impl<V, C: Codec<V>> Codec<V> for DecodeOnly<C> {
    fn decode(&self, bytes: Vec<u8>) -> Result<V, CodecError> {
        self.0.decode(bytes)
    }

    fn encode<'v>(&self, _value: &'v V) -> Result<Cow<'v, [u8]>, CodecError> {
        Err(CodecError::EncodingUnsupported)
    }

    fn supports_encoding(&self) -> bool {
        false
    }

    fn cost(&self, value: &V) -> usize {
        self.0.cost(value)
    }
}
