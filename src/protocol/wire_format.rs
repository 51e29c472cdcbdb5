//! Wire format constants and length-prefix encoding.
//!
//! Every agent message on the stream is a length prefix followed by the
//! payload:
//! ```text
//! ┌───────────┬────────────────────┐
//! │ Length    │ Payload            │
//! │ 4 bytes   │ `Length` bytes     │
//! │ uint32 BE │ opaque             │
//! └───────────┴────────────────────┘
//! ```
//!
//! The shared memory region uses the same layout for both the request
//! written by the client and the reply written back by the agent.

use std::time::Duration;

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Size of the shared memory region handed to the agent (from PuTTY's
/// `pageant.c`). Bounds the wire length of both request and reply.
pub const AGENT_MAX_MSGLEN: usize = 8192;

/// Signature carried in `COPYDATASTRUCT::dwData` so the agent recognises
/// the notification.
pub const AGENT_COPYDATA_ID: u32 = 0x804e_50ba;

/// How long the agent gets to answer one notification.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Window class the agent registers.
pub const PAGEANT_WINDOW_CLASS: &str = "Pageant";

/// Window title the agent uses.
pub const PAGEANT_WINDOW_TITLE: &str = "Pageant";

/// Prefix of every shared memory region name.
pub const CHANNEL_NAME_PREFIX: &str = "PageantRequest";

/// Encode a payload length as a big-endian prefix.
#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode the big-endian length prefix at the start of `buf`.
///
/// Returns `None` if fewer than 4 bytes are available. Does not consume.
///
/// # Example
///
/// ```
/// use pageant_client::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 0, 3, b'a']), Some(3));
/// assert_eq!(decode_length(&[0, 0]), None);
/// ```
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = buf.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// Total wire length (prefix + payload) of the frame starting at `buf`.
#[inline]
pub fn wire_length(buf: &[u8]) -> Option<usize> {
    decode_length(buf).map(|len| len as usize + LENGTH_PREFIX_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_big_endian() {
        assert_eq!(encode_length(3), [0, 0, 0, 3]);
        assert_eq!(encode_length(0x0102_0304), [1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_peeks_prefix_only() {
        let buf = [0, 0, 1, 0, 0xAA, 0xBB];
        assert_eq!(decode_length(&buf), Some(256));
        assert_eq!(wire_length(&buf), Some(260));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(decode_length(&[]), None);
        assert_eq!(decode_length(&[0, 0, 0]), None);
        assert_eq!(wire_length(&[0, 0, 0]), None);
    }

    #[test]
    fn test_pageant_constants() {
        assert_eq!(AGENT_MAX_MSGLEN, 8192);
        assert_eq!(AGENT_COPYDATA_ID, 0x804e50ba);
        assert_eq!(DEFAULT_NOTIFY_TIMEOUT, Duration::from_secs(5));
    }
}
