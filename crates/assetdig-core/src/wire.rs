//! Low-level byte cursor shared by the container parser and the field decoders.
//!
//! Everything in the serialized stream is 4-byte aligned after variable-length
//! payloads, so the cursor exposes [`Cursor::align4`] next to the fixed-width
//! readers. Multi-byte integers are little-endian except for the container
//! header, which is read with the explicit `_be` variants.

use crate::error::{Error, Result};

/// Round `n` up to the next multiple of 4.
pub fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Bounded cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at position 0.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Create a cursor at the given position.
    pub fn at(bytes: &'a [u8], pos: usize) -> Result<Self> {
        let mut cursor = Self::new(bytes);
        cursor.seek(pos)?;
        Ok(cursor)
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Total buffer length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the underlying buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remaining unread bytes.
    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    /// Whether the cursor sits exactly at the end of the buffer.
    pub fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Move to an absolute offset. Seeking to the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.bytes.len() {
            return Err(Error::SeekOutOfBounds {
                target: pos as i64,
                len: self.bytes.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Move relative to the current offset.
    pub fn seek_relative(&mut self, delta: i64) -> Result<()> {
        let target = self.pos as i64 + delta;
        if target < 0 || target > self.bytes.len() as i64 {
            return Err(Error::SeekOutOfBounds {
                target,
                len: self.bytes.len(),
            });
        }
        self.pos = target as usize;
        Ok(())
    }

    /// Skip `n` bytes, failing if fewer remain.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_exact(n).map(|_| ())
    }

    /// Read exactly `n` bytes and advance.
    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::UnexpectedEof {
                at: self.pos,
                need: n,
                rem: self.remaining(),
            });
        }

        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..self.pos])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_exact(N)?;
        let mut out = [0_u8; N];
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    /// Read a little-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_array().map(i16::from_le_bytes)
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_array().map(i32::from_le_bytes)
    }

    /// Read a little-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a little-endian IEEE-754 `f32`.
    pub fn read_f32(&mut self) -> Result<f32> {
        self.read_array().map(f32::from_le_bytes)
    }

    /// Advance to the next 4-byte aligned position.
    pub fn align4(&mut self) -> Result<()> {
        let skip = align4(self.pos) - self.pos;
        self.skip(skip)
    }

    /// Read `n` bytes as UTF-8.
    pub fn read_utf8(&mut self, n: usize) -> Result<&'a str> {
        let at = self.pos;
        let raw = self.read_exact(n)?;
        std::str::from_utf8(raw).map_err(|_| Error::InvalidUtf8 { offset: at })
    }

    /// Read a 32-bit length followed by that many UTF-8 bytes. No padding is consumed.
    pub fn read_prefixed_str(&mut self) -> Result<&'a str> {
        let len = self.read_u32()? as usize;
        self.read_utf8(len)
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let rem = &self.bytes[self.pos..];
        let Some(rel_end) = rem.iter().position(|byte| *byte == 0) else {
            return Err(Error::UnexpectedEof {
                at: self.pos,
                need: 1,
                rem: self.remaining(),
            });
        };

        let end = start + rel_end;
        self.pos = end + 1;
        std::str::from_utf8(&self.bytes[start..end]).map_err(|_| Error::InvalidUtf8 { offset: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align4_pads_by_at_most_three() {
        for n in 0..1024 {
            let aligned = align4(n);
            assert!(aligned - n <= 3, "align4({n}) = {aligned}");
            assert_eq!(aligned % 4, 0);
            assert_eq!(align4(aligned), aligned);
        }
    }

    #[test]
    fn test_read_mixed_endianness() {
        let data = [0x00, 0x00, 0x00, 0x11, 0x11, 0x00, 0x00, 0x00];
        let mut cursor = Cursor::new(&data);
        assert_eq!(cursor.read_u32_be().unwrap(), 17);
        assert_eq!(cursor.read_u32().unwrap(), 17);
        assert!(cursor.at_end());
    }

    #[test]
    fn test_align4_advances_cursor() {
        let data = [0u8; 8];
        let mut cursor = Cursor::new(&data);
        cursor.skip(1).unwrap();
        cursor.align4().unwrap();
        assert_eq!(cursor.pos(), 4);
        cursor.align4().unwrap();
        assert_eq!(cursor.pos(), 4);
    }

    #[test]
    fn test_read_cstr() {
        let data = b"5.6.2f1\0rest";
        let mut cursor = Cursor::new(data);
        assert_eq!(cursor.read_cstr().unwrap(), "5.6.2f1");
        assert_eq!(cursor.pos(), 8);
    }

    #[test]
    fn test_eof_reports_position() {
        let data = [1, 2];
        let mut cursor = Cursor::new(&data);
        let err = cursor.read_u32().unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof { at: 0, need: 4, rem: 2 }));
    }

    #[test]
    fn test_seek_bounds() {
        let data = [0u8; 4];
        let mut cursor = Cursor::new(&data);
        assert!(cursor.seek(4).is_ok());
        assert!(cursor.seek(5).is_err());
        assert!(cursor.seek_relative(-5).is_err());
        cursor.seek_relative(-2).unwrap();
        assert_eq!(cursor.pos(), 2);
    }
}
