//! Wire format encoding and decoding.
//!
//! Every value travels in its own frame:
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ Length   │ Payload              │
//! │ 4 bytes  │ `Length` bytes       │
//! │ uint32 BE│ one encoded Value    │
//! └──────────┴──────────────────────┘
//! ```
//!
//! A request is `reference, method, arg_count, args.., continuation`
//! (at least 5 frames); a reply is `succeeded, result_or_error` (2 frames).

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::MsgPackCodec;
use crate::error::{ObjwireError, Result};
use crate::value::Value;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size of a single frame (25 MiB).
pub const DEFAULT_LOAD_LIMIT: u32 = 256 * 102_400;

/// Default maximum number of arguments in one request.
pub const DEFAULT_ARG_COUNT_LIMIT: u32 = 256;

/// Number of frames in a reply.
pub const REPLY_FRAME_COUNT: usize = 2;

/// Encode a length prefix (Big Endian).
#[inline]
pub fn encode_length(length: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    length.to_be_bytes()
}

/// Decode a length prefix from the start of `buf`.
///
/// Returns `None` if fewer than 4 bytes are available.
///
/// # Example
///
/// ```
/// use objwire::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 1, 0, 0xff]), Some(256));
/// assert_eq!(decode_length(&[0, 0, 1]), None);
/// ```
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Check a declared length against the load limit.
#[inline]
pub fn validate_length(length: u32, load_limit: u32) -> Result<()> {
    if length > load_limit {
        return Err(ObjwireError::FrameTooLarge {
            length,
            limit: load_limit,
        });
    }
    Ok(())
}

/// Append one framed payload to `buf`.
pub fn put_frame(buf: &mut BytesMut, payload: &[u8]) -> Result<()> {
    let length = u32::try_from(payload.len()).map_err(|_| ObjwireError::FrameTooLarge {
        length: u32::MAX,
        limit: u32::MAX,
    })?;
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_slice(&encode_length(length));
    buf.put_slice(payload);
    Ok(())
}

/// Build a complete frame from a payload.
///
/// # Example
///
/// ```
/// use objwire::protocol::build_frame;
///
/// let bytes = build_frame(b"hello").unwrap();
/// assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
/// assert_eq!(&bytes[4..], b"hello");
/// ```
pub fn build_frame(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    put_frame(&mut buf, payload)?;
    Ok(buf.freeze())
}

/// Encode a representable value and frame it.
///
/// This does no proxy substitution; use [`crate::marshal`] for values that
/// may contain live objects.
pub fn frame_value(value: &Value) -> Result<Bytes> {
    build_frame(&MsgPackCodec::encode(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_big_endian_byte_order() {
        assert_eq!(encode_length(0x0102_0304), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_length(&[0x01, 0x02, 0x03, 0x04]), Some(0x0102_0304));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(decode_length(&[0u8; 3]).is_none());
        assert!(decode_length(&[]).is_none());
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length(100, 100).is_ok());
        let err = validate_length(101, 100).unwrap_err();
        assert!(matches!(
            err,
            ObjwireError::FrameTooLarge {
                length: 101,
                limit: 100
            }
        ));
        assert!(err.to_string().contains("too large packet 101"));
    }

    #[test]
    fn test_default_limits() {
        assert_eq!(DEFAULT_LOAD_LIMIT, 26_214_400);
        assert_eq!(DEFAULT_ARG_COUNT_LIMIT, 256);
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = build_frame(&[]).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_frame_value_prefix_matches_payload() {
        let frame = frame_value(&Value::Str("abc".into())).unwrap();
        let length = decode_length(&frame).unwrap() as usize;
        assert_eq!(frame.len(), LENGTH_PREFIX_SIZE + length);
    }
}
