//! Bounds-checked reader over a byte slice.
//!
//! Every decode path in the crate reads through this type; each multi-byte
//! read is one fallible operation, so a truncated frame surfaces as
//! [`CodecError::Truncated`] rather than a panic.

use super::CodecError;

/// Forward-only reader over `&[u8]` with explicit bounds checks.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset, for diagnostics.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8, CodecError> {
        self.check(1)?;
        Ok(self.buf[self.pos])
    }

    pub fn u8(&mut self) -> Result<u8, CodecError> {
        let b = self.peek_u8()?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16_be(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_be(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn f32_be(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_bits(self.u32_be()?))
    }

    /// Consume exactly `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.check(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consume `N` bytes into a fixed array (VMACs, UUIDs).
    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    /// Consume everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn check(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated {
                needed: needed - remaining,
                remaining,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_primitives_in_order() {
        let data = [0x01, 0x02, 0x03, 0x40, 0x91, 0x00, 0x00];
        let mut cur = Cursor::new(&data);
        assert_eq!(cur.u8().unwrap(), 0x01);
        assert_eq!(cur.u16_be().unwrap(), 0x0203);
        assert_eq!(cur.f32_be().unwrap(), 4.53125);
        assert!(cur.is_empty());
    }

    #[test]
    fn short_read_reports_missing_bytes() {
        let mut cur = Cursor::new(&[0xAA]);
        let err = cur.u32_be().unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 3,
                remaining: 1
            }
        );
        // A failed read consumes nothing.
        assert_eq!(cur.u8().unwrap(), 0xAA);
    }

    #[test]
    fn take_array_and_rest() {
        let data = [1, 2, 3, 4, 5];
        let mut cur = Cursor::new(&data);
        let head: [u8; 2] = cur.take_array().unwrap();
        assert_eq!(head, [1, 2]);
        assert_eq!(cur.rest(), &[3, 4, 5]);
        assert!(cur.take(1).is_err());
    }
}
