//! Buffer framing.

use crate::cursor::ByteCursor;
use crate::event::LogEvent;
use crate::header::{BUFFER_HEADER_SIZE, BufferHeader, FormatRevision};
use crate::{DecodeError, Result};
use serde::Serialize;
use std::io::{Read, Seek};

/// Largest payload we are willing to load for a single buffer.
pub const MAX_BUFFER_LEN: i32 = 256 * 1024 * 1024;

/// An event with its absolute time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedEvent {
    /// Nanoseconds, accumulated from the buffer's time base.
    pub time: u64,
    pub event: LogEvent,
}

/// One complete buffer of events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogBuffer {
    pub header: BufferHeader,
    pub events: Vec<TimedEvent>,
}

impl LogBuffer {
    /// Read the next buffer.
    ///
    /// A buffer is only decoded once all of its declared payload is
    /// available. `Ok(None)` means the writer has not flushed it yet; the
    /// stream is left at the start of the buffer so the next call retries it.
    /// On a decode error the stream is also rewound to the start of the
    /// buffer, so a later call sees the same bytes again.
    pub fn read<R: Read + Seek>(
        cursor: &mut ByteCursor<R>,
        revision: FormatRevision,
    ) -> Result<Option<Self>> {
        let start = cursor.position()?;
        match Self::read_at(cursor, revision) {
            Ok(Some(buffer)) => Ok(Some(buffer)),
            Ok(None) => {
                cursor.set_position(start)?;
                Ok(None)
            }
            Err(e) => {
                cursor.set_position(start)?;
                Err(e)
            }
        }
    }

    fn read_at<R: Read + Seek>(
        cursor: &mut ByteCursor<R>,
        revision: FormatRevision,
    ) -> Result<Option<Self>> {
        if !cursor.load_data(BUFFER_HEADER_SIZE)? {
            return Ok(None);
        }
        let header = BufferHeader::decode(cursor)?;
        if !(0..=MAX_BUFFER_LEN).contains(&header.length) {
            return Err(DecodeError::InvalidLength {
                what: "buffer",
                length: i64::from(header.length),
            });
        }
        if !cursor.load_data(header.length as usize)? {
            return Ok(None);
        }

        let mut events = Vec::new();
        let mut time = header.time_base;
        while !cursor.is_exhausted() {
            let (time_diff, event) = LogEvent::read(cursor, revision)?;
            time = time.wrapping_add(time_diff);
            events.push(TimedEvent { time, event });
        }

        tracing::trace!(
            length = header.length,
            events = events.len(),
            thread = header.thread_id,
            "decoded buffer"
        );
        Ok(Some(LogBuffer { header, events }))
    }
}
