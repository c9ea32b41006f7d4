//! Receive buffer shared between a UART's worker and the application.

use bytes::{Buf, BytesMut};

/// Growable byte queue with an explicit capacity that doubles until
/// incoming bytes fit.
#[derive(Debug)]
pub struct RxBuffer {
    data: BytesMut,
    capacity: usize,
}

impl RxBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `bytes`, doubling the capacity as often as needed.
    pub fn extend(&mut self, bytes: &[u8]) {
        let needed = self.data.len() + bytes.len();
        if needed > self.capacity {
            while self.capacity < needed {
                self.capacity *= 2;
            }
            self.data.reserve(self.capacity - self.data.len());
        }
        self.data.extend_from_slice(bytes);
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.data.get_u8())
    }

    /// Move up to `buf.len()` bytes into `buf`; returns how many.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len());
        self.data.copy_to_slice(&mut buf[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_doubles_until_bytes_fit() {
        let mut rx = RxBuffer::with_capacity(4);
        rx.extend(&[1, 2, 3]);
        assert_eq!(rx.capacity(), 4);
        rx.extend(&[4, 5]);
        assert_eq!(rx.capacity(), 8);
        rx.extend(&[0; 20]);
        assert_eq!(rx.capacity(), 32);
        assert_eq!(rx.len(), 25);
    }

    #[test]
    fn test_reads_consume_in_order() {
        let mut rx = RxBuffer::with_capacity(1024);
        assert_eq!(rx.peek(), None);
        assert_eq!(rx.pop(), None);
        rx.extend(b"hello");
        assert_eq!(rx.peek(), Some(b'h'));
        assert_eq!(rx.pop(), Some(b'h'));

        let mut buf = [0u8; 3];
        assert_eq!(rx.read_into(&mut buf), 3);
        assert_eq!(&buf, b"ell");
        let mut buf = [0u8; 8];
        assert_eq!(rx.read_into(&mut buf), 1);
        assert_eq!(buf[0], b'o');
        assert!(rx.is_empty());
    }
}
