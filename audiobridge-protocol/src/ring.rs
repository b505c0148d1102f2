//! Fixed-capacity circular byte queue.
//!
//! ```text
//!            head            head + len
//!             v                  v
//! +-----------+==================+-----------+
//! |   free    |     buffered     |   free    |
//! +-----------+==================+-----------+
//! ```
//!
//! The buffered region may wrap around the end of the storage, in which case
//! [`ByteRingBuffer::peek`] returns it as two slices.
//!
//! Pushes are all-or-nothing: a push that does not fit leaves the buffer
//! untouched. The type is not synchronized; callers wrap it in whatever lock
//! their threading model needs.

/// Bounded FIFO of bytes.
#[derive(Clone)]
pub struct ByteRingBuffer {
    storage: Box<[u8]>,
    head: usize,
    len: usize,
}

impl ByteRingBuffer {
    /// Creates an empty buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Number of buffered bytes.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Maximum number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes that can still be pushed.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Appends `bytes` if they fit entirely, otherwise returns `false` and
    /// leaves the buffer unchanged.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free() {
            return false;
        }
        if bytes.is_empty() {
            return true;
        }

        let cap = self.capacity();
        let tail = (self.head + self.len) % cap;
        let first = bytes.len().min(cap - tail);
        self.storage[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.storage[..rest].copy_from_slice(&bytes[first..]);
        }
        self.len += bytes.len();
        true
    }

    /// Removes and returns the oldest `n` bytes, or `None` if fewer are buffered.
    pub fn pop(&mut self, n: usize) -> Option<Vec<u8>> {
        if n > self.len {
            return None;
        }
        let mut out = vec![0u8; n];
        self.pop_into(&mut out);
        Some(out)
    }

    /// Removes exactly `dst.len()` bytes into `dst`. Returns `false` and
    /// consumes nothing if fewer are buffered.
    pub fn pop_into(&mut self, dst: &mut [u8]) -> bool {
        if dst.len() > self.len {
            return false;
        }
        self.peek_into(dst);
        self.advance(dst.len());
        true
    }

    /// Drops the oldest `n` bytes. Returns `false` if fewer are buffered.
    pub fn discard(&mut self, n: usize) -> bool {
        if n > self.len {
            return false;
        }
        self.advance(n);
        true
    }

    /// Returns the buffered bytes, oldest first, as two contiguous slices.
    ///
    /// The second slice is empty unless the buffered region wraps.
    pub fn peek(&self) -> (&[u8], &[u8]) {
        if self.len == 0 {
            return (&[], &[]);
        }
        let cap = self.capacity();
        let end = self.head + self.len;
        if end <= cap {
            (&self.storage[self.head..end], &[])
        } else {
            (&self.storage[self.head..], &self.storage[..end - cap])
        }
    }

    /// Copies up to `dst.len()` of the oldest bytes into `dst` without
    /// consuming them. Returns the number of bytes copied.
    pub fn peek_into(&self, dst: &mut [u8]) -> usize {
        let (a, b) = self.peek();
        let n = dst.len().min(self.len);
        let from_a = n.min(a.len());
        dst[..from_a].copy_from_slice(&a[..from_a]);
        let from_b = n - from_a;
        dst[from_a..n].copy_from_slice(&b[..from_b]);
        n
    }

    /// Copies every buffered byte into `out` without consuming them.
    pub fn copy_to(&self, out: &mut Vec<u8>) {
        let (a, b) = self.peek();
        out.extend_from_slice(a);
        out.extend_from_slice(b);
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        } else {
            self.head = (self.head + n) % self.capacity();
        }
    }
}

impl std::fmt::Debug for ByteRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteRingBuffer")
            .field("size", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_pop_fifo() {
        let mut ring = ByteRingBuffer::with_capacity(8);
        assert!(ring.push(b"abc"));
        assert!(ring.push(b"de"));
        assert_eq!(ring.size(), 5);
        assert_eq!(ring.pop(2).unwrap(), b"ab");
        assert_eq!(ring.pop(3).unwrap(), b"cde");
        assert!(ring.is_empty());
    }

    #[test]
    fn test_push_is_all_or_nothing() {
        let mut ring = ByteRingBuffer::with_capacity(4);
        assert!(ring.push(b"abc"));
        assert!(!ring.push(b"de"));
        assert_eq!(ring.size(), 3);
        assert_eq!(ring.pop(3).unwrap(), b"abc");
    }

    #[test]
    fn test_pop_more_than_buffered() {
        let mut ring = ByteRingBuffer::with_capacity(4);
        ring.push(b"ab");
        assert!(ring.pop(3).is_none());
        let mut dst = [0u8; 3];
        assert!(!ring.pop_into(&mut dst));
        assert!(!ring.discard(3));
        assert_eq!(ring.size(), 2);
    }

    #[test]
    fn test_wraparound_peek() {
        let mut ring = ByteRingBuffer::with_capacity(6);
        ring.push(b"abcd");
        ring.discard(3);
        // "d" sits at index 3; the next push wraps past the end
        assert!(ring.push(b"efgh"));
        let (a, b) = ring.peek();
        assert_eq!(a, b"def");
        assert_eq!(b, b"gh");

        let mut dst = [0u8; 4];
        assert_eq!(ring.peek_into(&mut dst), 4);
        assert_eq!(&dst, b"defg");
        assert_eq!(ring.size(), 5);

        let mut all = Vec::new();
        ring.copy_to(&mut all);
        assert_eq!(all, b"defgh");
        assert_eq!(ring.pop(5).unwrap(), b"defgh");
    }

    #[test]
    fn test_fill_to_capacity() {
        let mut ring = ByteRingBuffer::with_capacity(3);
        assert!(ring.push(b"xyz"));
        assert!(ring.is_full());
        assert_eq!(ring.free(), 0);
        assert!(!ring.push(b"!"));
        assert!(ring.push(b""));
        ring.clear();
        assert_eq!(ring.free(), 3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(Vec<u8>),
        Pop(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..24).prop_map(Op::Push),
            (0usize..24).prop_map(Op::Pop),
        ]
    }

    proptest! {
        #[test]
        fn prop_size_tracks_pushed_minus_popped(ops in prop::collection::vec(op(), 0..64)) {
            let mut ring = ByteRingBuffer::with_capacity(32);
            let mut model: std::collections::VecDeque<u8> = Default::default();

            for op in ops {
                match op {
                    Op::Push(bytes) => {
                        let before = ring.size();
                        let fits = bytes.len() <= ring.capacity() - before;
                        prop_assert_eq!(ring.push(&bytes), fits);
                        if fits {
                            model.extend(bytes.iter().copied());
                        } else {
                            prop_assert_eq!(ring.size(), before);
                        }
                    }
                    Op::Pop(n) => {
                        let popped = ring.pop(n);
                        if n <= model.len() {
                            let expected: Vec<u8> = model.drain(..n).collect();
                            prop_assert_eq!(popped, Some(expected));
                        } else {
                            prop_assert!(popped.is_none());
                        }
                    }
                }
                prop_assert_eq!(ring.size(), model.len());
                prop_assert!(ring.size() <= ring.capacity());
            }
        }
    }
}
