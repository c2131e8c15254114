//! Protocol module - wire format, framing, request and reply shapes.
//!
//! This module implements the length-prefixed value protocol:
//! - 4-byte big-endian length prefix + one encoded value per frame
//! - Frame buffer for accumulating partial reads
//! - Request assembly state machine
//! - Two-frame replies

mod frame_buffer;
mod reply;
mod request;
mod wire_format;

pub use frame_buffer::{FrameBuffer, Framer};
pub use reply::{encode_reply, Reply, ReplyReader};
pub use request::{decode_reference, reference_value, CallRequest, RequestAssembler, Step};
pub use wire_format::{
    build_frame, decode_length, encode_length, frame_value, put_frame, validate_length,
    DEFAULT_ARG_COUNT_LIMIT, DEFAULT_LOAD_LIMIT, LENGTH_PREFIX_SIZE, REPLY_FRAME_COUNT,
};
