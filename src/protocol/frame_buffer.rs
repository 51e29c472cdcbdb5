//! Frame buffer for accumulating partial writes.
//!
//! Bytes handed to the socket are appended here until at least one whole
//! length-prefixed frame is present. The prefix is only peeked; the buffer
//! shrinks by splitting off one complete frame (prefix + payload) at
//! a time, so a frame split across any number of writes is reassembled
//! byte for byte.
//!
//! A frame announcing more than the size limit is never buffered: its bytes
//! are dropped as they arrive, and `next_frame` reports it once the last of
//! them has passed. Frames behind it are unaffected.
//!
//! # Example
//!
//! ```
//! use pageant_client::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! buffer.extend(b"\x00\x00\x00\x03a");
//! assert!(buffer.next_frame().unwrap().is_none());
//!
//! buffer.extend(b"bc");
//! let frame = buffer.next_frame().unwrap().unwrap();
//! assert_eq!(frame.payload(), b"abc");
//! assert!(buffer.is_empty());
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{wire_length, AGENT_MAX_MSGLEN};
use super::Frame;
use crate::error::{PageantError, Result};

/// Buffer for accumulating outgoing bytes and extracting complete frames.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes not yet resolved into a complete frame.
    buffer: BytesMut,
    /// Maximum allowed wire length (prefix + payload) of one frame.
    max_frame_size: usize,
    /// Oversized frame currently being dropped.
    discarding: Option<Discard>,
}

#[derive(Debug, Clone, Copy)]
struct Discard {
    /// Wire length announced by the prefix.
    len: usize,
    /// Bytes of it not yet seen.
    remaining: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer bounded by the agent's region size.
    pub fn new() -> Self {
        Self::with_max_frame(AGENT_MAX_MSGLEN)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_size.min(64 * 1024)),
            max_frame_size,
            discarding: None,
        }
    }

    /// Append data without extracting frames.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Split off the next complete frame, if one is fully buffered.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(MessageTooLarge)` once every byte of an oversized frame has
    ///   been dropped; the next call continues with the following frame
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.discarding.is_none() {
            let Some(total) = wire_length(&self.buffer) else {
                return Ok(None);
            };

            if total <= self.max_frame_size {
                if self.buffer.len() < total {
                    tracing::trace!(
                        buffered = self.buffer.len(),
                        needed = total,
                        "waiting for rest of frame"
                    );
                    return Ok(None);
                }

                let wire = self.buffer.split_to(total).freeze();
                return Frame::from_wire(wire).map(Some);
            }

            tracing::warn!(
                len = total,
                max = self.max_frame_size,
                "dropping oversized frame"
            );
            self.discarding = Some(Discard {
                len: total,
                remaining: total,
            });
        }

        self.discard()
    }

    /// Drop buffered bytes of the oversized frame; fail once it is gone.
    fn discard(&mut self) -> Result<Option<Frame>> {
        let Some(discard) = self.discarding.as_mut() else {
            return Ok(None);
        };

        let dropped = discard.remaining.min(self.buffer.len());
        self.buffer.advance(dropped);
        discard.remaining -= dropped;
        if discard.remaining > 0 {
            return Ok(None);
        }

        let len = discard.len;
        self.discarding = None;
        Err(PageantError::MessageTooLarge {
            len,
            max: self.max_frame_size,
        })
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the buffered bytes (for inspection).
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// True once a full prefix is buffered but the payload is incomplete.
    #[cfg(test)]
    fn awaiting_payload(&self) -> bool {
        wire_length(&self.buffer).is_some_and(|total| self.buffer.len() < total)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
