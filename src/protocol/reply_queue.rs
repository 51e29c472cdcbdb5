//! Queue of reply bytes waiting to be read by the caller.

use bytes::{Bytes, BytesMut};

/// Concatenated agent replies, consumed from the front.
#[derive(Debug, Default)]
pub struct ReplyQueue {
    buffer: BytesMut,
}

impl ReplyQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one reply (prefix included) to the back.
    pub fn push(&mut self, reply: &[u8]) {
        self.buffer.extend_from_slice(reply);
    }

    /// Remove up to `n` bytes from the front, or everything when `n` is
    /// `None`. Returns an empty `Bytes` when nothing is queued.
    pub fn read(&mut self, n: Option<usize>) -> Bytes {
        let take = n.map_or(self.buffer.len(), |n| n.min(self.buffer.len()));
        self.buffer.split_to(take).freeze()
    }

    /// Copy as many queued bytes as fit into `out`, returning the count.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let take = out.len().min(self.buffer.len());
        out[..take].copy_from_slice(&self.buffer[..take]);
        let _ = self.buffer.split_to(take);
        take
    }

    /// Get the number of queued bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_empty_queue() {
        let mut queue = ReplyQueue::new();
        assert!(queue.read(None).is_empty());
        assert!(queue.read(Some(10)).is_empty());
    }

    #[test]
    fn test_read_all() {
        let mut queue = ReplyQueue::new();
        queue.push(b"\x00\x00\x00\x02ok");
        queue.push(b"\x00\x00\x00\x01!");

        assert_eq!(&queue.read(None)[..], b"\x00\x00\x00\x02ok\x00\x00\x00\x01!");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_reads_match_full_drain() {
        let data = b"\x00\x00\x00\x05hello\x00\x00\x00\x03abc";

        for split in 0..=data.len() {
            let mut queue = ReplyQueue::new();
            queue.push(data);

            let mut joined = queue.read(Some(split)).to_vec();
            joined.extend_from_slice(&queue.read(None));

            assert_eq!(joined, data, "split at {}", split);
        }
    }

    #[test]
    fn test_read_more_than_available() {
        let mut queue = ReplyQueue::new();
        queue.push(b"abc");

        assert_eq!(&queue.read(Some(100))[..], b"abc");
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_read_into() {
        let mut queue = ReplyQueue::new();
        queue.push(b"abcdef");

        let mut out = [0u8; 4];
        assert_eq!(queue.read_into(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(queue.read_into(&mut out), 2);
        assert_eq!(&out[..2], b"ef");
        assert_eq!(queue.read_into(&mut out), 0);
    }
}
