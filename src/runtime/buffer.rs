//! Per-connection byte cursor.
//!
//! Incoming socket chunks are appended at the back; parsers consume fields
//! from the front with `take`. Whatever a parser does not consume stays in
//! the cursor and is seen again, ahead of newly read data, on the next call.
//! This is what lets a field split across any number of reads be reassembled
//! without loss or duplication.

use bytes::{Buf, Bytes, BytesMut};

/// An owned, growable byte sequence with consume-from-front semantics.
///
/// Each connection owns exactly one cursor; it is never shared.
#[derive(Debug, Default)]
pub struct ByteCursor {
    buf: BytesMut,
}

impl ByteCursor {
    /// Create an empty cursor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cursor with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append bytes at the back.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take up to `n` bytes from the front, removing them.
    ///
    /// If fewer than `n` bytes are available, returns all of them and leaves
    /// the cursor empty.
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// Take a single byte from the front.
    pub fn take_u8(&mut self) -> Option<u8> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.get_u8())
        }
    }

    /// Look at the unread bytes without consuming them.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check if there are no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl From<&[u8]> for ByteCursor {
    fn from(data: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(data),
        }
    }
}
