//! Reply encoding and reading.
//!
//! A reply is two frames: a `Bool` success flag, then the result (on
//! success) or the error value (on failure).

use bytes::{Bytes, BytesMut};

use super::frame_buffer::Framer;
use super::wire_format::{put_frame, REPLY_FRAME_COUNT};
use crate::codec::MsgPackCodec;
use crate::error::{ObjwireError, RemoteError, Result};
use crate::value::Value;

/// Build both reply frames from an already dumped result payload.
pub fn encode_reply(succeeded: bool, payload: &[u8]) -> Result<Bytes> {
    let flag = MsgPackCodec::encode(&Value::Bool(succeeded))?;
    let mut buf = BytesMut::with_capacity(flag.len() + payload.len() + 8);
    put_frame(&mut buf, &flag)?;
    put_frame(&mut buf, payload)?;
    Ok(buf.freeze())
}

/// A decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub succeeded: bool,
    pub result: Value,
}

impl Reply {
    /// Convert into the result a caller sees.
    ///
    /// A failure whose value is not an error (an undecodable payload, or a
    /// peer that raised something else) is turned into a [`RemoteError`].
    pub fn into_result(self) -> std::result::Result<Value, RemoteError> {
        if self.succeeded {
            return Ok(self.result);
        }
        Err(match self.result {
            Value::Error(err) => err,
            Value::Unknown(unknown) => RemoteError::from_unknown(unknown),
            other => RemoteError::new(other.type_name().to_string(), other.describe()),
        })
    }
}

/// Incremental reader for one reply.
pub struct ReplyReader {
    framer: Framer,
    values: Vec<Value>,
}

impl ReplyReader {
    /// Create a reader enforcing `load_limit` on each frame.
    pub fn new(load_limit: u32) -> Self {
        Self {
            framer: Framer::with_load_limit(load_limit),
            values: Vec::with_capacity(REPLY_FRAME_COUNT),
        }
    }

    /// Feed bytes; returns the reply once both values have arrived.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Reply>> {
        let values = &mut self.values;
        self.framer.push(data, |v| values.push(v))?;

        if self.values.len() < REPLY_FRAME_COUNT {
            return Ok(None);
        }

        let mut values = self.values.drain(..REPLY_FRAME_COUNT);
        let flag = values.next();
        let result = values.next().unwrap_or(Value::Nil);
        match flag {
            Some(Value::Bool(succeeded)) => Ok(Some(Reply { succeeded, result })),
            Some(other) => Err(ObjwireError::Protocol(format!(
                "expected reply flag, got {}",
                other.describe()
            ))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::UnknownValue;

    fn reply_bytes(succeeded: bool, result: &Value) -> Bytes {
        encode_reply(succeeded, &MsgPackCodec::encode(result).unwrap()).unwrap()
    }

    #[test]
    fn test_read_success_reply() {
        let bytes = reply_bytes(true, &Value::Int(1));
        let mut reader = ReplyReader::new(1024);

        let reply = reader.push(&bytes).unwrap().unwrap();
        assert_eq!(
            reply,
            Reply {
                succeeded: true,
                result: Value::Int(1)
            }
        );
        assert_eq!(reply.into_result(), Ok(Value::Int(1)));
    }

    #[test]
    fn test_read_reply_in_pieces() {
        let err = RemoteError::arity(1, 2);
        let bytes = reply_bytes(false, &Value::Error(err.clone()));
        let mut reader = ReplyReader::new(1024);

        let mut reply = None;
        for byte in bytes.iter() {
            if let Some(r) = reader.push(&[*byte]).unwrap() {
                reply = Some(r);
            }
        }
        assert_eq!(reply.unwrap().into_result(), Err(err));
    }

    #[test]
    fn test_failure_with_plain_value() {
        let reply = Reply {
            succeeded: false,
            result: Value::from("oops"),
        };
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.kind, "String");
        assert_eq!(err.message, "\"oops\"");
    }

    #[test]
    fn test_failure_with_unknown_value() {
        let reply = Reply {
            succeeded: false,
            result: Value::Unknown(UnknownValue::new(vec![0xc1], "bad")),
        };
        assert!(reply.into_result().unwrap_err().is_unknown());
    }

    #[test]
    fn test_bad_flag_is_protocol_error() {
        let bytes = reply_bytes(true, &Value::Nil);
        // Swap the flag frame for an integer.
        let mut forged = crate::protocol::frame_value(&Value::Int(3)).unwrap().to_vec();
        let flag_len = 4 + crate::protocol::decode_length(&bytes).unwrap() as usize;
        forged.extend_from_slice(&bytes[flag_len..]);

        let mut reader = ReplyReader::new(1024);
        assert!(matches!(
            reader.push(&forged),
            Err(ObjwireError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversize_reply_frame() {
        let bytes = reply_bytes(true, &Value::from("x".repeat(64)));
        let mut reader = ReplyReader::new(16);
        assert!(matches!(
            reader.push(&bytes),
            Err(ObjwireError::FrameTooLarge { .. })
        ));
    }
}
