//! Buffered window reads over a growing log file.
//!
//! The profiler appends to its log while we read it, so the cursor never
//! assumes that the bytes it wants are already on disk. [`ByteCursor::load_data`]
//! pulls a fixed-size window out of the stream and reports `false` when the
//! writer has not flushed enough yet. Every primitive read after that consumes
//! the window only.

use crate::{DecodeError, Result};
use std::io::{self, Read, Seek, SeekFrom};

/// Longest encoding of a 64-bit value in LEB128.
const MAX_VARINT_LEN: usize = 10;

/// A buffered window over a seekable byte stream.
#[derive(Debug)]
pub struct ByteCursor<R> {
    stream: R,
    window: Vec<u8>,
    pos: usize,
}

impl<R: Read + Seek> ByteCursor<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream,
            window: Vec::new(),
            pos: 0,
        }
    }

    /// Buffer the next `size` bytes of the stream into the window.
    ///
    /// Returns `Ok(false)` when fewer than `size` bytes are available. The
    /// stream position is left untouched in that case, so the caller can try
    /// again once the file has grown.
    pub fn load_data(&mut self, size: usize) -> Result<bool> {
        let start = self.stream.stream_position()?;
        let mut window = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.stream.read(&mut window[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled < size {
            self.stream.seek(SeekFrom::Start(start))?;
            return Ok(false);
        }

        self.window = window;
        self.pos = 0;
        Ok(true)
    }

    /// Current position of the underlying stream.
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.stream.stream_position()?)
    }

    /// Move the underlying stream and drop whatever window is loaded.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.stream.seek(SeekFrom::Start(position))?;
        self.clear_window();
        Ok(())
    }

    /// Total length of the underlying stream.
    pub fn stream_len(&mut self) -> Result<u64> {
        let current = self.stream.stream_position()?;
        let len = self.stream.seek(SeekFrom::End(0))?;
        self.stream.seek(SeekFrom::Start(current))?;
        Ok(len)
    }

    pub fn into_inner(self) -> R {
        self.stream
    }
}

impl<R> ByteCursor<R> {
    /// Bytes left in the loaded window.
    pub fn remaining(&self) -> usize {
        self.window.len() - self.pos
    }

    /// Offset of the next read inside the loaded window.
    pub fn window_offset(&self) -> usize {
        self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.window.len()
    }

    fn clear_window(&mut self) {
        self.window.clear();
        self.pos = 0;
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEnd {
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.window[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read an unsigned LEB128 value.
    pub fn read_uleb128(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.window.get(self.pos) else {
                return Err(DecodeError::UnterminatedVarint(start));
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintTooLong(start))
    }

    /// Read a signed LEB128 value, sign-extending from the last byte.
    pub fn read_sleb128(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut value = 0i64;
        let mut shift = 0u32;
        for _ in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.window.get(self.pos) else {
                return Err(DecodeError::UnterminatedVarint(start));
            };
            self.pos += 1;
            value |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    value |= -1i64 << shift;
                }
                return Ok(value);
            }
        }
        Err(DecodeError::VarintTooLong(start))
    }

    /// Read a null-terminated UTF-8 string. Invalid sequences are replaced.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.pos;
        let rest = &self.window[self.pos..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(DecodeError::UnterminatedString(start));
        };
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{encode_sleb128, encode_uleb128};
    use std::io::Cursor;

    fn loaded(bytes: &[u8]) -> ByteCursor<Cursor<Vec<u8>>> {
        let mut cursor = ByteCursor::new(Cursor::new(bytes.to_vec()));
        assert!(cursor.load_data(bytes.len()).unwrap());
        cursor
    }

    #[test]
    fn uleb128_roundtrip_edges() {
        let values = [
            0u64,
            1,
            0x7f,
            0x80,
            0x3fff,
            0x4000,
            u64::from(u32::MAX),
            u64::MAX - 1,
            u64::MAX,
        ];
        for value in values {
            let mut bytes = Vec::new();
            encode_uleb128(value, &mut bytes);
            let mut cursor = loaded(&bytes);
            assert_eq!(cursor.read_uleb128().unwrap(), value, "value {value:#x}");
            assert!(cursor.is_exhausted());
        }
    }

    #[test]
    fn sleb128_roundtrip_edges() {
        let values = [
            0i64,
            1,
            -1,
            63,
            64,
            -64,
            -65,
            i64::from(i32::MIN),
            i64::from(i32::MAX),
            i64::MIN,
            i64::MAX,
        ];
        for value in values {
            let mut bytes = Vec::new();
            encode_sleb128(value, &mut bytes);
            let mut cursor = loaded(&bytes);
            assert_eq!(cursor.read_sleb128().unwrap(), value, "value {value}");
            assert!(cursor.is_exhausted());
        }
    }

    #[test]
    fn varint_roundtrip_pseudo_random() {
        let mut state = 0x9e37_79b9_7f4a_7c15u64;
        for _ in 0..2000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let shift = (state % 64) as u32;
            let unsigned = state >> shift;
            let signed = (state as i64) >> shift;

            let mut bytes = Vec::new();
            encode_uleb128(unsigned, &mut bytes);
            encode_sleb128(signed, &mut bytes);
            let mut cursor = loaded(&bytes);
            assert_eq!(cursor.read_uleb128().unwrap(), unsigned);
            assert_eq!(cursor.read_sleb128().unwrap(), signed);
        }
    }

    #[test]
    fn known_sleb128_encodings() {
        let mut cursor = loaded(&[0x02, 0x7e, 0xff, 0x00, 0x81, 0x7f, 0x80, 0x7f]);
        assert_eq!(cursor.read_sleb128().unwrap(), 2);
        assert_eq!(cursor.read_sleb128().unwrap(), -2);
        assert_eq!(cursor.read_sleb128().unwrap(), 127);
        assert_eq!(cursor.read_sleb128().unwrap(), -127);
        assert_eq!(cursor.read_sleb128().unwrap(), -128);
    }

    #[test]
    fn unterminated_varint_is_an_error() {
        let mut cursor = loaded(&[0x80, 0x80]);
        assert!(matches!(
            cursor.read_uleb128(),
            Err(DecodeError::UnterminatedVarint(0))
        ));
    }

    #[test]
    fn overlong_varint_is_an_error() {
        let mut cursor = loaded(&[0xff; 11]);
        assert!(matches!(
            cursor.read_sleb128(),
            Err(DecodeError::VarintTooLong(0))
        ));
    }

    #[test]
    fn fixed_width_reads_are_little_endian() {
        let mut bytes = vec![0x34, 0x12];
        bytes.extend_from_slice(&0x4d50_5a01i32.to_le_bytes());
        bytes.extend_from_slice(&(-5i64).to_le_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        let mut cursor = loaded(&bytes);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_i32().unwrap(), 0x4d50_5a01);
        assert_eq!(cursor.read_i64().unwrap(), -5);
        assert_eq!(cursor.read_f64().unwrap(), 1.5);
    }

    #[test]
    fn reads_stop_at_window_end() {
        let mut cursor = ByteCursor::new(Cursor::new(vec![1u8, 2, 3, 4, 5, 6]));
        assert!(cursor.load_data(2).unwrap());
        assert_eq!(cursor.read_u8().unwrap(), 1);
        assert!(matches!(
            cursor.read_u16(),
            Err(DecodeError::UnexpectedEnd {
                needed: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn short_load_keeps_stream_position() {
        let mut cursor = ByteCursor::new(Cursor::new(vec![1u8, 2, 3]));
        assert!(cursor.load_data(1).unwrap());
        assert!(!cursor.load_data(8).unwrap());
        assert_eq!(cursor.position().unwrap(), 1);
        // the previous window is still readable after a failed load
        assert_eq!(cursor.read_u8().unwrap(), 1);
        assert!(cursor.load_data(2).unwrap());
        assert_eq!(cursor.read_u8().unwrap(), 2);
    }

    #[test]
    fn cstrings() {
        let mut cursor = loaded(b"System.String\0\0tail");
        assert_eq!(cursor.read_cstring().unwrap(), "System.String");
        assert_eq!(cursor.read_cstring().unwrap(), "");
        assert!(matches!(
            cursor.read_cstring(),
            Err(DecodeError::UnterminatedString(15))
        ));
    }
}
