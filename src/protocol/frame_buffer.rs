//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForLength`: Need at least 4 bytes
//! - `WaitingForPayload`: Length parsed, need N more payload bytes
//!
//! [`Framer`] sits on top and turns payloads into [`Value`]s.
//!
//! # Example
//!
//! ```
//! use objwire::protocol::{frame_value, Framer};
//! use objwire::value::Value;
//!
//! let mut framer = Framer::new();
//! let bytes = frame_value(&Value::Int(7)).unwrap();
//!
//! let mut values = Vec::new();
//! for byte in bytes.iter() {
//!     framer.push(&[*byte], |v| values.push(v)).unwrap();
//! }
//! assert_eq!(values, vec![Value::Int(7)]);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_length, validate_length, DEFAULT_LOAD_LIMIT, LENGTH_PREFIX_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::value::Value;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix.
    WaitingForLength,
    /// Length parsed, waiting for payload bytes.
    WaitingForPayload { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    load_limit: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default load limit.
    pub fn new() -> Self {
        Self::with_load_limit(DEFAULT_LOAD_LIMIT)
    }

    /// Create a new frame buffer with a custom load limit.
    pub fn with_load_limit(load_limit: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForLength,
            load_limit,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` as soon as a declared length exceeds the
    /// load limit, before any of that payload is read.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();
        while let Some(payload) = self.try_extract_one()? {
            payloads.push(payload);
        }

        Ok(payloads)
    }

    /// Try to extract a single payload from the buffer.
    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForLength => {
                let Some(length) = decode_length(&self.buffer) else {
                    return Ok(None);
                };

                validate_length(length, self.load_limit)?;

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);

                if length == 0 {
                    return Ok(Some(Bytes::new()));
                }

                self.state = State::WaitingForPayload { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForPayload { remaining } => {
                let remaining = remaining as usize;

                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForLength;

                Ok(Some(payload))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame buffer that decodes each payload into a [`Value`].
pub struct Framer {
    frames: FrameBuffer,
}

impl Framer {
    /// Create a framer with the default load limit.
    pub fn new() -> Self {
        Self {
            frames: FrameBuffer::new(),
        }
    }

    /// Create a framer with a custom load limit.
    pub fn with_load_limit(load_limit: u32) -> Self {
        Self {
            frames: FrameBuffer::with_load_limit(load_limit),
        }
    }

    /// Append `data` and hand every complete value to `handler`, in order.
    ///
    /// Undecodable payloads are delivered as [`Value::Unknown`].
    ///
    /// # Errors
    ///
    /// `FrameTooLarge` aborts the stream; values completed earlier in the
    /// same push have already been delivered.
    pub fn push<F>(&mut self, data: &[u8], mut handler: F) -> Result<()>
    where
        F: FnMut(Value),
    {
        self.frames.buffer.extend_from_slice(data);
        while let Some(payload) = self.frames.try_extract_one()? {
            handler(MsgPackCodec::decode_value(&payload));
        }
        Ok(())
    }

    /// Get the number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.frames.len()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
