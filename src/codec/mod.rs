//! Codec module - serialization/deserialization for frame payloads.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//!
//! The codec is the opaque serializer of the protocol: a frame payload is
//! exactly one encoded [`Value`](crate::value::Value).
//!
//! # Example
//!
//! ```
//! use objwire::codec::MsgPackCodec;
//! use objwire::value::Value;
//!
//! let encoded = MsgPackCodec::encode(&Value::Int(42)).unwrap();
//! assert_eq!(MsgPackCodec::decode_value(&encoded), Value::Int(42));
//!
//! // Garbage never fails the stream, it becomes a placeholder.
//! assert!(matches!(MsgPackCodec::decode_value(&[0xc1]), Value::Unknown(_)));
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
