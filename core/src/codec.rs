//! Codecs bind one domain type to its wire representation.
//!
//! Every topic or state table in the system is paired with exactly one
//! [`Codec`]. Events on the deposit stream use a compact binary encoding
//! ([`BincodeCodec`]); state snapshots use a self-describing JSON encoding
//! ([`JsonCodec`]) so the changelog topics stay inspectable with ordinary
//! Kafka tooling.
//!
//! # Erased codecs
//!
//! Adapters that juggle several codecs can hold them as [`DynCodec`]. The
//! erased form checks the value's type at runtime and fails with
//! [`CodecError::TypeMismatch`] rather than coercing:
//!
//! ```
//! use wallet_stream_core::codec::{DynCodec, JsonCodec};
//! use wallet_stream_core::error::CodecError;
//!
//! let codec = JsonCodec::<u64>::new("Counter");
//! let wrong: &dyn std::any::Any = &"not a counter";
//! assert!(matches!(
//!     codec.encode_dyn(wrong),
//!     Err(CodecError::TypeMismatch { .. })
//! ));
//! ```

use crate::error::CodecError;
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Encoder/decoder bound to exactly one value type.
///
/// Implementations must be stateless and safe to share across tasks.
pub trait Codec: Send + Sync {
    /// The domain type this codec is bound to.
    type Value: Send + Sync + 'static;

    /// Human-readable schema name used in error messages.
    fn schema(&self) -> &'static str;

    /// Encode a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the serializer rejects the value.
    fn encode(&self, value: &Self::Value) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the bytes do not parse.
    fn decode(&self, data: &[u8]) -> Result<Self::Value, CodecError>;
}

/// Type-erased view of a [`Codec`].
pub trait DynCodec: Send + Sync {
    /// Encode a value of unknown static type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] if `value` is not the bound type.
    fn encode_dyn(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError>;

    /// Decode into a boxed value of the bound type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the bytes do not parse.
    fn decode_dyn(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, CodecError>;
}

impl<C> DynCodec for C
where
    C: Codec,
{
    fn encode_dyn(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError> {
        let typed = value
            .downcast_ref::<C::Value>()
            .ok_or(CodecError::TypeMismatch {
                expected: self.schema(),
            })?;
        self.encode(typed)
    }

    fn decode_dyn(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        Ok(Box::new(self.decode(data)?))
    }
}

/// Compact binary codec backed by `bincode`.
pub struct BincodeCodec<T> {
    schema: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Create a codec reporting `schema` in its errors.
    #[must_use]
    pub const fn new(schema: &'static str) -> Self {
        Self {
            schema,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new(self.schema)
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BincodeCodec")
            .field("schema", &self.schema)
            .finish()
    }
}

impl<T> Codec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn schema(&self) -> &'static str {
        self.schema
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode {
            schema: self.schema,
            reason: e.to_string(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(data).map_err(|e| CodecError::Malformed {
            schema: self.schema,
            reason: e.to_string(),
        })
    }
}

/// Self-describing codec backed by `serde_json`.
pub struct JsonCodec<T> {
    schema: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Create a codec reporting `schema` in its errors.
    #[must_use]
    pub const fn new(schema: &'static str) -> Self {
        Self {
            schema,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new(self.schema)
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("schema", &self.schema)
            .finish()
    }
}

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn schema(&self) -> &'static str {
        self.schema
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            schema: self.schema,
            reason: e.to_string(),
        })
    }

    fn decode(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Malformed {
            schema: self.schema,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        value: f64,
    }

    #[test]
    fn bincode_round_trip() {
        let codec = BincodeCodec::<Sample>::new("Sample");
        let sample = Sample {
            id: "a".to_string(),
            value: 1.5,
        };
        let bytes = codec.encode(&sample).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), sample);
    }

    #[test]
    fn json_is_self_describing() {
        let codec = JsonCodec::<Sample>::new("Sample");
        let bytes = codec
            .encode(&Sample {
                id: "a".to_string(),
                value: 2.0,
            })
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"id\":\"a\""));
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let codec = JsonCodec::<Sample>::new("Sample");
        let err = codec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { schema: "Sample", .. }));

        let codec = BincodeCodec::<Sample>::new("Sample");
        assert!(codec.decode(&[0xff]).is_err());
    }

    #[test]
    fn erased_encode_rejects_foreign_types() {
        let codec = BincodeCodec::<Sample>::new("Sample");
        let err = codec.encode_dyn(&42_u32).unwrap_err();
        assert_eq!(err, CodecError::TypeMismatch { expected: "Sample" });
    }

    #[test]
    fn erased_round_trip_preserves_type() {
        let codec = JsonCodec::<Sample>::new("Sample");
        let sample = Sample {
            id: "b".to_string(),
            value: -3.25,
        };
        let bytes = codec.encode_dyn(&sample).unwrap();
        let decoded = codec.decode_dyn(&bytes).unwrap();
        assert_eq!(decoded.downcast_ref::<Sample>(), Some(&sample));
    }
}
