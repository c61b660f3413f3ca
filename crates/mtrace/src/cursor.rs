use crate::error::DecodeError;

/// A forward-only read position inside a borrowed trace buffer.
///
/// All reads are bounds-checked against the buffer length. A failed read
/// leaves the position untouched.
#[derive(Debug, Clone)]
pub struct DecodeCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DecodeCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes that can still be read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    /// Reads exactly `N` bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_slice(N)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Borrows the next `len` bytes straight out of the underlying buffer.
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::TruncatedInput {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }

        let start = self.pos;
        self.pos += len;
        Ok(&self.data[start..self.pos])
    }

    /// Moves the position back to `pos`. Only used to make multi-byte reads atomic.
    pub(crate) fn rewind_to(&mut self, pos: usize) {
        debug_assert!(pos <= self.pos);
        self.pos = pos;
    }
}
