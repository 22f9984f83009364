//! Outbound frame bytes with a consumption cursor.

use bytes::Bytes;

/// A frame being written to the socket, possibly over several partial writes.
#[derive(Debug, Clone)]
pub struct SpdyBuffer {
    data: Bytes,
    offset: usize,
}

impl SpdyBuffer {
    pub fn new(data: Bytes) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes not yet written.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    pub fn remaining_size(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn total_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_fully_consumed(&self) -> bool {
        self.offset == self.data.len()
    }

    /// Mark `n` bytes as written.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.remaining_size());
        self.offset = (self.offset + n).min(self.data.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_consumption() {
        let mut buf = SpdyBuffer::new(Bytes::from_static(b"abcdef"));
        assert_eq!(buf.total_size(), 6);

        buf.consume(2);
        assert_eq!(buf.remaining(), b"cdef");
        assert!(!buf.is_fully_consumed());

        buf.consume(4);
        assert_eq!(buf.remaining_size(), 0);
        assert!(buf.is_fully_consumed());
    }
}
