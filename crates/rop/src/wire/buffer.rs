// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte buffer with an optional capacity limit.

use bytes::{Buf, BytesMut};

/// FIFO byte buffer backed by [`BytesMut`].
///
/// Writers append at the back, readers consume from the front. A limit caps
/// how many unread bytes may be held, which is what forces an encoder to
/// report `NeedMore` and resume after the socket drained some bytes.
#[derive(Debug)]
pub struct Buffer {
    data: BytesMut,
    limit: usize,
}

impl Buffer {
    /// Unbounded buffer.
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            limit: usize::MAX,
        }
    }

    /// Buffer holding at most `limit` unread bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(limit.min(64 * 1024)),
            limit,
        }
    }

    /// Unread bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Room left before the limit.
    pub fn margin(&self) -> usize {
        self.limit.saturating_sub(self.data.len())
    }

    /// Unread bytes as one slice.
    pub fn chunk(&self) -> &[u8] {
        &self.data
    }

    /// Drop `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        self.data.advance(n.min(self.data.len()));
    }

    /// Move up to `dst.len()` bytes out of the front; returns the count.
    pub fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.data.len());
        dst[..n].copy_from_slice(&self.data[..n]);
        self.data.advance(n);
        n
    }

    /// Append as much of `src` as the limit allows; returns the count.
    pub fn put(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.margin());
        self.data.extend_from_slice(&src[..n]);
        n
    }

    /// Append all of `src`, ignoring the limit.
    pub fn extend(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_caps_put() {
        let mut buf = Buffer::with_limit(4);
        assert_eq!(buf.put(&[1, 2, 3]), 3);
        assert_eq!(buf.margin(), 1);
        assert_eq!(buf.put(&[4, 5, 6]), 1);
        assert_eq!(buf.chunk(), &[1, 2, 3, 4]);
        assert_eq!(buf.put(&[7]), 0);

        buf.consume(2);
        assert_eq!(buf.margin(), 2);
        assert_eq!(buf.put(&[5, 6]), 2);
        assert_eq!(buf.chunk(), &[3, 4, 5, 6]);
    }

    #[test]
    fn test_take_partial() {
        let mut buf = Buffer::new();
        buf.extend(&[9, 8, 7]);
        let mut dst = [0u8; 2];
        assert_eq!(buf.take(&mut dst), 2);
        assert_eq!(dst, [9, 8]);
        let mut dst = [0u8; 4];
        assert_eq!(buf.take(&mut dst), 1);
        assert_eq!(dst[0], 7);
        assert!(buf.is_empty());
        assert_eq!(buf.take(&mut dst), 0);
    }

    #[test]
    fn test_consume_past_end() {
        let mut buf = Buffer::new();
        buf.extend(&[1, 2]);
        buf.consume(10);
        assert!(buf.is_empty());
    }
}
