//! Protocol module - wire format, framing, and reply buffering.
//!
//! This module implements the stream side of the adapter:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial writes
//! - Reply queue for piecewise reads

mod frame;
mod frame_buffer;
mod reply_queue;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use reply_queue::ReplyQueue;
pub use wire_format::{
    decode_length, encode_length, wire_length, AGENT_COPYDATA_ID, AGENT_MAX_MSGLEN,
    CHANNEL_NAME_PREFIX, DEFAULT_NOTIFY_TIMEOUT, LENGTH_PREFIX_SIZE, PAGEANT_WINDOW_CLASS,
    PAGEANT_WINDOW_TITLE,
};
