use std::fmt;
use std::io::{self, Read, Write};

/// A fixed-capacity byte buffer.
///
/// Capacity is chosen once at construction and never grows: running out of
/// room is reported to the caller instead of reallocating. Connections own
/// two of these (read side and write side) for their whole lifetime.
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    /// Create a new zeroed buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Perform a single read from `reader` into the unused tail of the buffer.
    ///
    /// Returns `Ok(0)` both for end-of-stream and when the buffer is already
    /// full; callers distinguish the two with [`Buffer::is_full`].
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.is_full() {
            return Ok(0);
        }

        let bytes_read = reader.read(&mut self.data[self.len..])?;
        self.len += bytes_read;

        Ok(bytes_read)
    }

    /// Append raw bytes. Fails closed: nothing is written if they do not fit.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.remaining_capacity() {
            return false;
        }

        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    /// Append formatted text. Fails closed: on overflow the buffer length is
    /// left exactly as it was before the call.
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) -> bool {
        let mut spare = &mut self.data[self.len..];
        let available = spare.len();
        if spare.write_fmt(args).is_err() {
            return false;
        }

        self.len += available - spare.len();
        true
    }

    /// Zero the contents and forget everything written
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }

    /// Get a slice of the buffered data
    pub fn slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Get the remaining capacity in the buffer
    pub fn remaining_capacity(&self) -> usize {
        self.data.len() - self.len
    }

    /// Get the total capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
