//! Growable I/O Buffer
//!
//! Every connection owns two of these: one for bytes read from the socket
//! and one for bytes waiting to be written back.
//!
//! ## Layout
//!
//! ```text
//! +-------------------+------------------+------------------+
//! | prependable bytes |  readable bytes  |  writable bytes  |
//! |                   |     (CONTENT)    |                  |
//! +-------------------+------------------+------------------+
//! 0      <=      read_pos     <=     write_pos    <=    capacity
//! ```
//!
//! Bytes are appended at `write_pos` and consumed from `read_pos`. When the
//! writable tail is too small, the buffer first tries to slide the readable
//! content back to offset 0 (reclaiming the prependable space) and only
//! reallocates when that is not enough. It never shrinks on its own.
//!
//! ## Reading from a socket
//!
//! [`Buffer::read_from`] issues one vectored read into the writable tail
//! plus a 64 KiB scratch area on the stack, so a burst larger than the
//! current capacity still costs a single system call. Whatever landed in
//! the scratch area is appended afterwards.

use std::io::{self, IoSliceMut, Read, Write};

/// Default capacity of a freshly created buffer.
pub const INITIAL_BUFFER_SIZE: usize = 1024;

/// Size of the on-stack overflow region used by [`Buffer::read_from`].
const SCRATCH_SIZE: usize = 64 * 1024;

/// A contiguous byte buffer with independent read and write cursors.
#[derive(Debug, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    /// Creates a buffer with [`INITIAL_BUFFER_SIZE`] bytes of capacity.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_BUFFER_SIZE)
    }

    /// Creates a buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Total size of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be appended without growing or compacting.
    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Bytes appended but not yet consumed.
    #[inline]
    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Already-consumed space in front of the readable region.
    #[inline]
    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// Returns `true` when there is nothing to read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// The readable region.
    #[inline]
    pub fn peek(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// The writable tail. Pair with [`Buffer::has_written`].
    #[inline]
    pub fn begin_write(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Marks `len` bytes of the writable tail as filled.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`Buffer::writable_bytes`].
    pub fn has_written(&mut self, len: usize) {
        assert!(
            len <= self.writable_bytes(),
            "has_written({len}) past the writable region ({})",
            self.writable_bytes()
        );
        self.write_pos += len;
    }

    /// Makes sure at least `len` bytes are writable.
    ///
    /// Readable content is preserved. Compaction is preferred over
    /// reallocation.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    /// Consumes up to `len` readable bytes.
    ///
    /// Asking for more than is readable drains the buffer. Once the buffer
    /// is drained both cursors go back to 0.
    pub fn retrieve(&mut self, len: usize) {
        if len >= self.readable_bytes() {
            self.retrieve_all();
        } else {
            self.read_pos += len;
        }
    }

    /// Drops all readable content and resets both cursors.
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Drains the buffer into a `String`, replacing invalid UTF-8.
    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    /// Copies `data` into the writable region, growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let end = self.write_pos + data.len();
        self.buf[self.write_pos..end].copy_from_slice(data);
        self.write_pos = end;
    }

    /// Appends a UTF-8 string.
    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Appends the readable region of another buffer.
    pub fn append_buffer(&mut self, other: &Buffer) {
        self.append(other.peek());
    }

    /// Reads once from `reader` with a vectored read.
    ///
    /// The first slice is the writable tail, the second a stack scratch
    /// area; bytes that overflowed into the scratch area are appended
    /// afterwards. Returns the number of bytes read, 0 meaning end of
    /// stream.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut extra = [0u8; SCRATCH_SIZE];
        let writable = self.writable_bytes();

        let n = {
            let tail = &mut self.buf[self.write_pos..];
            let mut iov = [IoSliceMut::new(tail), IoSliceMut::new(&mut extra)];
            reader.read_vectored(&mut iov)?
        };

        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.buf.len();
            self.append(&extra[..n - writable]);
        }
        Ok(n)
    }

    /// Writes the readable region once and consumes what was accepted.
    ///
    /// A short count is normal on a non-blocking socket; call again when
    /// the descriptor is writable to resume where it stopped.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let n = writer.write(self.peek())?;
        self.retrieve(n);
        Ok(n)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.buf.resize(self.write_pos + len, 0);
        } else {
            let readable = self.readable_bytes();
            self.buf.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_layout(buf: &Buffer) {
        assert_eq!(
            buf.readable_bytes() + buf.prependable_bytes() + buf.writable_bytes(),
            buf.capacity()
        );
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = Buffer::new();
        assert_eq!(buf.capacity(), INITIAL_BUFFER_SIZE);
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.writable_bytes(), INITIAL_BUFFER_SIZE);
        assert_eq!(buf.prependable_bytes(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_append_and_retrieve() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"hello world");
        assert_eq!(buf.peek(), b"hello world");

        buf.retrieve(6);
        assert_eq!(buf.peek(), b"world");
        assert_eq!(buf.prependable_bytes(), 6);
        assert_layout(&buf);
    }

    #[test]
    fn test_retrieve_caps_at_readable() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"abc");
        buf.retrieve(100);
        assert!(buf.is_empty());
        assert_eq!(buf.prependable_bytes(), 0);
        assert_eq!(buf.writable_bytes(), 8);
    }

    #[test]
    fn test_retrieve_all_to_string() {
        let mut buf = Buffer::new();
        buf.append_str("GET / HTTP/1.1\r\n");
        assert_eq!(buf.retrieve_all_to_string(), "GET / HTTP/1.1\r\n");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compaction_preferred_over_growth() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"0123456789");
        buf.retrieve(8);
        // 6 writable + 8 prependable >= 10, so no reallocation
        buf.append(b"abcdefghij");
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.prependable_bytes(), 0);
        assert_eq!(buf.peek(), b"89abcdefghij");
        assert_layout(&buf);
    }

    #[test]
    fn test_growth_when_compaction_is_not_enough() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"1234");
        buf.retrieve(1);
        buf.append(b"abcdefghij");
        assert!(buf.capacity() >= 14);
        assert_eq!(buf.peek(), b"234abcdefghij");
        assert_layout(&buf);
    }

    #[test]
    fn test_ensure_writable_preserves_content() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"abcd");
        buf.ensure_writable(100);
        assert!(buf.writable_bytes() >= 100);
        assert_eq!(buf.peek(), b"abcd");
    }

    #[test]
    fn test_begin_write_and_has_written() {
        let mut buf = Buffer::with_capacity(8);
        buf.begin_write()[..3].copy_from_slice(b"xyz");
        buf.has_written(3);
        assert_eq!(buf.peek(), b"xyz");
    }

    #[test]
    #[should_panic]
    fn test_has_written_past_capacity_panics() {
        let mut buf = Buffer::with_capacity(4);
        buf.has_written(5);
    }

    #[test]
    fn test_append_buffer() {
        let mut a = Buffer::new();
        let mut b = Buffer::new();
        a.append(b"head-");
        b.append(b"tail");
        a.append_buffer(&b);
        assert_eq!(a.peek(), b"head-tail");
        assert_eq!(b.peek(), b"tail");
    }

    #[test]
    fn test_read_larger_than_capacity_in_one_call() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let mut reader: &[u8] = &payload;

        let mut buf = Buffer::with_capacity(16);
        let n = buf.read_from(&mut reader).unwrap();

        assert_eq!(n, payload.len());
        assert_eq!(buf.peek(), &payload[..]);
        assert_layout(&buf);
    }

    #[test]
    fn test_read_eof_returns_zero() {
        let mut reader: &[u8] = &[];
        let mut buf = Buffer::new();
        assert_eq!(buf.read_from(&mut reader).unwrap(), 0);
        assert!(buf.is_empty());
    }

    /// Accepts at most `limit` bytes per call, then refuses with WouldBlock
    /// once its budget is spent.
    struct ShortWriter {
        out: Vec<u8>,
        limit: usize,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = data.len().min(self.limit).min(self.budget);
            self.out.extend_from_slice(&data[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_is_resumable() {
        let mut buf = Buffer::new();
        buf.append(b"0123456789abcdef");

        let mut w = ShortWriter {
            out: Vec::new(),
            limit: 5,
            budget: 7,
        };
        assert_eq!(buf.write_to(&mut w).unwrap(), 5);
        assert_eq!(buf.write_to(&mut w).unwrap(), 2);
        let err = buf.write_to(&mut w).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buf.peek(), b"789abcdef");

        // socket becomes writable again
        w.budget = usize::MAX;
        while !buf.is_empty() {
            buf.write_to(&mut w).unwrap();
        }
        assert_eq!(w.out, b"0123456789abcdef");
    }

    #[test]
    fn test_random_append_retrieve_keeps_layout() {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut buf = Buffer::with_capacity(32);
        let mut model: std::collections::VecDeque<u8> = Default::default();
        let mut counter = 0u8;

        for _ in 0..2000 {
            if next() % 3 == 0 {
                let n = (next() % 64) as usize;
                buf.retrieve(n);
                for _ in 0..n.min(model.len()) {
                    model.pop_front();
                }
            } else {
                let n = (next() % 48) as usize;
                let chunk: Vec<u8> = (0..n)
                    .map(|_| {
                        counter = counter.wrapping_add(1);
                        counter
                    })
                    .collect();
                buf.append(&chunk);
                model.extend(chunk);
            }

            assert_layout(&buf);
            assert_eq!(buf.peek(), model.iter().copied().collect::<Vec<_>>().as_slice());
        }
    }
}
