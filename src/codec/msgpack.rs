//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named` so structs inside values (errors, references)
//! are encoded as maps with field names. That keeps optional fields such as
//! [`RemoteError::backtrace`](crate::error::RemoteError) forward compatible.

use crate::error::Result;
use crate::value::{UnknownValue, Value};

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized (for [`Value`], when
    /// it contains a live [`Value::Object`]).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode one frame payload into a [`Value`].
    ///
    /// Malformed payloads are not an error at this level: they come back as
    /// [`Value::Unknown`] carrying the raw bytes and the decoder's complaint.
    pub fn decode_value(bytes: &[u8]) -> Value {
        match rmp_serde::from_slice::<Value>(bytes) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("undecodable payload ({} bytes): {}", bytes.len(), e);
                Value::Unknown(UnknownValue::new(bytes, e.to_string()))
            }
        }
    }
}
