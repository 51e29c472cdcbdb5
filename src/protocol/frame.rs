//! Frame struct with typed accessors.
//!
//! A frame keeps its verbatim wire bytes (prefix included) in a
//! `bytes::Bytes`, so writing it into the shared region and queueing a reply
//! never re-encodes anything.
//!
//! # Example
//!
//! ```
//! use pageant_client::protocol::{build_frame, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::from_wire(Bytes::from(build_frame(b"abc").unwrap())).unwrap();
//!
//! assert_eq!(frame.declared_len(), 3);
//! assert_eq!(frame.payload(), b"abc");
//! assert_eq!(frame.as_bytes(), b"\x00\x00\x00\x03abc");
//! ```

use bytes::Bytes;

use super::wire_format::{decode_length, encode_length, LENGTH_PREFIX_SIZE};
use crate::error::{PageantError, Result};

/// One length-prefixed agent message.
///
/// Invariant: the prefix always equals the payload length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    wire: Bytes,
}

impl Frame {
    /// Wrap a payload, prepending its length prefix.
    pub fn new(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            wire: Bytes::from(build_frame(payload)?),
        })
    }

    /// Adopt complete wire bytes (prefix + payload).
    ///
    /// Fails if the prefix disagrees with the number of bytes that follow it.
    pub fn from_wire(wire: Bytes) -> Result<Self> {
        let declared = decode_length(&wire).ok_or_else(|| {
            PageantError::Protocol(format!("frame of {} bytes has no length prefix", wire.len()))
        })?;
        let actual = wire.len() - LENGTH_PREFIX_SIZE;
        if declared as usize != actual {
            return Err(PageantError::Protocol(format!(
                "length prefix {} does not match payload of {} bytes",
                declared, actual
            )));
        }
        Ok(Self { wire })
    }

    /// Get the payload bytes (without prefix).
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.wire[LENGTH_PREFIX_SIZE..]
    }

    /// Get the length carried in the prefix.
    #[inline]
    pub fn declared_len(&self) -> u32 {
        (self.wire.len() - LENGTH_PREFIX_SIZE) as u32
    }

    /// Get the complete wire representation.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.wire
    }

    /// Total size on the wire (prefix + payload).
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

}

/// Build a complete frame as a single byte vector.
///
/// Fails if the payload length does not fit the 32-bit prefix.
///
/// # Example
///
/// ```
/// use pageant_client::protocol::build_frame;
///
/// assert_eq!(build_frame(b"ok").unwrap(), b"\x00\x00\x00\x02ok");
/// ```
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len()).map_err(|_| PageantError::MessageTooLarge {
        len: payload.len().saturating_add(LENGTH_PREFIX_SIZE),
        max: u32::MAX as usize,
    })?;
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&encode_length(len));
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(b"hello").unwrap();

        assert_eq!(frame.declared_len(), 5);
        assert_eq!(frame.payload(), b"hello");
        assert_eq!(frame.wire_len(), 9);
        assert_eq!(&frame.as_bytes()[..4], &[0, 0, 0, 5]);
    }

    #[test]
    fn test_frame_empty_payload() {
        let frame = Frame::new(b"").unwrap();

        assert_eq!(frame.declared_len(), 0);
        assert!(frame.payload().is_empty());
        assert_eq!(frame.as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_from_wire_accepts_matching_prefix() {
        let frame = Frame::from_wire(Bytes::from_static(b"\x00\x00\x00\x02ok")).unwrap();
        assert_eq!(frame.payload(), b"ok");
    }

    #[test]
    fn test_from_wire_rejects_mismatched_prefix() {
        let err = Frame::from_wire(Bytes::from_static(b"\x00\x00\x00\x05ok")).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_build_frame() {
        assert_eq!(build_frame(b"abc").unwrap(), b"\x00\x00\x00\x03abc");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_build_frame_rejects_payload_beyond_prefix_range() {
        // Zeroed allocation; the pages are never touched.
        let payload = vec![0u8; u32::MAX as usize + 1];

        let err = build_frame(&payload).unwrap_err();

        assert!(matches!(err, PageantError::MessageTooLarge { .. }));
        assert!(Frame::new(&payload).is_err());
    }

    #[test]
    fn test_from_wire_rejects_missing_prefix() {
        assert!(Frame::from_wire(Bytes::from_static(b"\x00\x01")).is_err());
    }
}
