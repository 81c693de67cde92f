//! File and buffer headers.

use crate::cursor::ByteCursor;
use crate::{DecodeError, Result};
use serde::Serialize;
use std::io::{Read, Seek};

/// Magic number at the start of every log file.
pub const LOG_HEADER_ID: u32 = 0x4D50_5A01;
/// Magic number at the start of every buffer.
pub const BUF_ID: u32 = 0x4D50_4C01;

/// Size of the fixed part of the file header.
pub const LOG_HEADER_FIXED_SIZE: usize = 30;
/// Size of a buffer header.
pub const BUFFER_HEADER_SIZE: usize = 48;

/// First format version that uses the current event layouts.
pub const CURRENT_FORMAT_VERSION: u8 = 13;

/// Upper bound for a header string, to reject garbage lengths early.
const MAX_HEADER_STRING_LEN: i32 = 1 << 20;

/// Event layout revision declared by the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatRevision {
    /// Format versions before 13.
    Legacy,
    /// Format version 13 and later.
    Current,
}

impl FormatRevision {
    pub fn from_format_version(version: u8) -> Self {
        if version >= CURRENT_FORMAT_VERSION {
            FormatRevision::Current
        } else {
            FormatRevision::Legacy
        }
    }

    pub fn is_current(self) -> bool {
        self == FormatRevision::Current
    }
}

/// The header at the start of a log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogHeader {
    pub major: u8,
    pub minor: u8,
    pub format: u8,
    pub ptr_size: u8,
    /// Milliseconds since the epoch when the profiled process started.
    pub startup_time: i64,
    pub timer_overhead: i32,
    pub flags: i32,
    pub pid: i32,
    /// Loopback port the profiler listens on for commands.
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

/// A header for a log in the current format, as written by a 64-bit runtime.
impl Default for LogHeader {
    fn default() -> Self {
        LogHeader {
            major: 3,
            minor: 0,
            format: CURRENT_FORMAT_VERSION,
            ptr_size: 8,
            startup_time: 0,
            timer_overhead: 0,
            flags: 0,
            pid: 0,
            port: 0,
            args: None,
            arch: None,
            os: None,
        }
    }
}

impl LogHeader {
    /// Read the file header at the cursor's current position.
    ///
    /// Returns `Ok(None)` when the header has not been completely written
    /// yet; the stream position is restored in that case.
    pub fn read<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> Result<Option<Self>> {
        let start = cursor.position()?;
        if !cursor.load_data(LOG_HEADER_FIXED_SIZE)? {
            return Ok(None);
        }

        let id = cursor.read_u32()?;
        if id != LOG_HEADER_ID {
            return Err(DecodeError::BadMagic {
                what: "log header",
                expected: LOG_HEADER_ID,
                found: id,
            });
        }

        let mut header = LogHeader {
            major: cursor.read_u8()?,
            minor: cursor.read_u8()?,
            format: cursor.read_u8()?,
            ptr_size: cursor.read_u8()?,
            startup_time: cursor.read_i64()?,
            timer_overhead: cursor.read_i32()?,
            flags: cursor.read_i32()?,
            pid: cursor.read_i32()?,
            port: cursor.read_u16()?,
            args: None,
            arch: None,
            os: None,
        };

        if header.revision().is_current() {
            for slot in [&mut header.args, &mut header.arch, &mut header.os] {
                match read_prefixed_string(cursor)? {
                    Some(s) => *slot = Some(s),
                    None => {
                        cursor.set_position(start)?;
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some(header))
    }

    pub fn revision(&self) -> FormatRevision {
        FormatRevision::from_format_version(self.format)
    }
}

/// Read an int32 length followed by that many bytes of UTF-8, dropping
/// trailing NULs. `Ok(None)` means the bytes are not on disk yet.
fn read_prefixed_string<R: Read + Seek>(cursor: &mut ByteCursor<R>) -> Result<Option<String>> {
    if !cursor.load_data(4)? {
        return Ok(None);
    }
    let len = cursor.read_i32()?;
    if !(0..=MAX_HEADER_STRING_LEN).contains(&len) {
        return Err(DecodeError::InvalidLength {
            what: "header string",
            length: i64::from(len),
        });
    }
    if !cursor.load_data(len as usize)? {
        return Ok(None);
    }
    let bytes = cursor.read_bytes(len as usize)?;
    let s = String::from_utf8_lossy(&bytes);
    Ok(Some(s.trim_end_matches('\0').to_string()))
}

/// The header in front of every buffer of events.
///
/// Pointer and object fields of the events in the buffer are deltas against
/// `ptr_base` and `obj_base`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferHeader {
    /// Payload length in bytes.
    pub length: i32,
    /// Absolute time of the buffer, in nanoseconds.
    pub time_base: u64,
    pub ptr_base: i64,
    pub obj_base: i64,
    pub thread_id: i64,
    pub method_base: i64,
}

impl BufferHeader {
    /// Decode a buffer header from a window of at least
    /// [`BUFFER_HEADER_SIZE`] bytes.
    pub fn decode<R>(cursor: &mut ByteCursor<R>) -> Result<Self> {
        let id = cursor.read_u32()?;
        if id != BUF_ID {
            return Err(DecodeError::BadMagic {
                what: "buffer",
                expected: BUF_ID,
                found: id,
            });
        }
        Ok(BufferHeader {
            length: cursor.read_i32()?,
            time_base: cursor.read_u64()?,
            ptr_base: cursor.read_i64()?,
            obj_base: cursor.read_i64()?,
            thread_id: cursor.read_i64()?,
            method_base: cursor.read_i64()?,
        })
    }

    /// Absolute address for a pointer delta (classes, images, methods).
    pub fn pointer(&self, delta: i64) -> i64 {
        self.ptr_base.wrapping_add(delta)
    }

    /// Absolute address for an object delta.
    pub fn object(&self, delta: i64) -> i64 {
        self.obj_base.wrapping_add(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::LogWriter;
    use std::io::Cursor;

    fn sample_header(format: u8) -> LogHeader {
        LogHeader {
            major: 3,
            minor: 0,
            format,
            ptr_size: 8,
            startup_time: 1_700_000_000_000,
            timer_overhead: 12,
            flags: 0,
            pid: 4242,
            port: 5500,
            args: None,
            arch: None,
            os: None,
        }
    }

    #[test]
    fn revision_threshold() {
        assert_eq!(FormatRevision::from_format_version(8), FormatRevision::Legacy);
        assert_eq!(FormatRevision::from_format_version(12), FormatRevision::Legacy);
        assert_eq!(FormatRevision::from_format_version(13), FormatRevision::Current);
        assert_eq!(FormatRevision::from_format_version(17), FormatRevision::Current);
    }

    #[test]
    fn legacy_header_has_no_strings() {
        let mut bytes = Vec::new();
        LogWriter::new(&mut bytes).write_header(&sample_header(8)).unwrap();
        assert_eq!(bytes.len(), LOG_HEADER_FIXED_SIZE);

        let mut cursor = ByteCursor::new(Cursor::new(bytes));
        let header = LogHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(header, sample_header(8));
        assert_eq!(header.revision(), FormatRevision::Legacy);
    }

    #[test]
    fn current_header_strings() {
        let mut expected = sample_header(13);
        expected.args = Some("--profile=log:heapshot=ondemand".to_string());
        expected.arch = Some("x86-64".to_string());
        expected.os = Some("linux".to_string());

        let mut bytes = Vec::new();
        LogWriter::new(&mut bytes).write_header(&expected).unwrap();
        let mut cursor = ByteCursor::new(Cursor::new(bytes));
        let header = LogHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(header, expected);
        assert_eq!(header.port, 5500);
    }

    #[test]
    fn header_string_trailing_nuls_are_trimmed() {
        let mut bytes = Vec::new();
        LogWriter::new(&mut bytes).write_header(&sample_header(8)).unwrap();
        bytes[6] = 13;
        for s in [&b"abc\0\0"[..], b"x64\0", b"osx"] {
            bytes.extend_from_slice(&(s.len() as i32).to_le_bytes());
            bytes.extend_from_slice(s);
        }
        let mut cursor = ByteCursor::new(Cursor::new(bytes));
        let header = LogHeader::read(&mut cursor).unwrap().unwrap();
        assert_eq!(header.args.as_deref(), Some("abc"));
        assert_eq!(header.arch.as_deref(), Some("x64"));
        assert_eq!(header.os.as_deref(), Some("osx"));
    }

    #[test]
    fn truncated_header_is_not_an_error() {
        let mut header = sample_header(14);
        header.args = Some("args".to_string());
        header.arch = Some("arm64".to_string());
        header.os = Some("macos".to_string());
        let mut bytes = Vec::new();
        LogWriter::new(&mut bytes).write_header(&header).unwrap();
        bytes.truncate(bytes.len() - 2);

        let mut cursor = ByteCursor::new(Cursor::new(bytes));
        assert!(LogHeader::read(&mut cursor).unwrap().is_none());
        assert_eq!(cursor.position().unwrap(), 0);
    }

    #[test]
    fn bad_magic() {
        let mut bytes = vec![0u8; LOG_HEADER_FIXED_SIZE];
        bytes[..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        let mut cursor = ByteCursor::new(Cursor::new(bytes));
        let err = LogHeader::read(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::BadMagic {
                found: 0xdead_beef,
                ..
            }
        ));
    }

    #[test]
    fn buffer_bases() {
        let header = BufferHeader {
            length: 0,
            time_base: 0,
            ptr_base: 0x1000,
            obj_base: 0x7f00_0000,
            thread_id: 1,
            method_base: 0,
        };
        assert_eq!(header.pointer(-0x10), 0xff0);
        assert_eq!(header.object(0x20), 0x7f00_0020);
    }
}
