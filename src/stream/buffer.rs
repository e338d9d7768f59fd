//! Bounded buffer for received stream payload.

use bytes::{Buf, BytesMut};

/// Error raised when an append would exceed the buffer's capacity.
///
/// A well-behaved peer never triggers this: the capacity equals the credit
/// we have granted, so overflow means the peer wrote past its window.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BufferFull;

/// Accumulates received DATA payload until the application drains it.
///
/// Capacity is fixed at construction to the stream's receive window; the
/// `closed` marker wakes readers for end-of-stream handling.
pub(crate) struct ReceiveBuffer {
    data: BytesMut,
    capacity: usize,
}

impl ReceiveBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize { self.data.len() }

    pub(crate) fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Append `payload`, failing without partial effect on overflow.
    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<(), BufferFull> {
        if self.data.len() + payload.len() > self.capacity {
            return Err(BufferFull);
        }
        self.data.extend_from_slice(payload);
        Ok(())
    }

    /// Move up to `dst.len()` buffered bytes into `dst`.
    pub(crate) fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.data.len().min(dst.len());
        self.data.copy_to_slice(&mut dst[..n]);
        n
    }
}
