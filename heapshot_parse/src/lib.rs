//! Decoder for the binary event logs written by the Mono log profiler.
//!
//! A log is a [`LogHeader`] followed by a sequence of [`LogBuffer`]s. Each
//! buffer carries a small header of base values and a run of tagged,
//! varint-encoded [`LogEvent`]s. This crate turns those bytes into typed
//! events; it does not interpret them. Building heap snapshots out of the
//! heap-walk events is the job of the `heapshot` crate.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use heapshot_parse::{ByteCursor, LogBuffer, LogHeader};
//!
//! let mut cursor = ByteCursor::new(File::open("app.mlpd").unwrap());
//! let header = LogHeader::read(&mut cursor).unwrap().expect("header not flushed yet");
//!
//! while let Some(buffer) = LogBuffer::read(&mut cursor, header.revision()).unwrap() {
//!     for event in &buffer.events {
//!         println!("{:>12} {}", event.time, event.event.family());
//!     }
//! }
//! ```

pub mod buffer;
pub mod cursor;
pub mod event;
pub mod header;
pub mod writer;

use thiserror::Error;

pub use buffer::{LogBuffer, TimedEvent};
pub use cursor::ByteCursor;
pub use event::{
    AllocEvent, Backtrace, CounterData, CounterDescription, CounterValue, CoverageEvent,
    EventFamily, ExceptionEvent, GcEvent, GcEventKind, HeapEvent, HeapObject, HeapReference,
    HeapRoot, HeapRootEntry, LogEvent, MetaEvent, MetadataEvent, MetadataKind, MethodEvent,
    MonitorEvent, MonitorEventKind, RootKind, RuntimeEvent, SampleEvent,
};
pub use header::{BufferHeader, FormatRevision, LogHeader};
pub use writer::{BufferWriter, LogWriter, encode_sleb128, encode_uleb128};

/// Errors that can occur while decoding a log.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad {what} magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        what: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("unexpected end of buffer: needed {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    #[error("unterminated varint at buffer offset {0}")]
    UnterminatedVarint(usize),

    #[error("varint at buffer offset {0} does not fit in 64 bits")]
    VarintTooLong(usize),

    #[error("unterminated string at buffer offset {0}")]
    UnterminatedString(usize),

    #[error("unknown event family {0}")]
    UnknownEventFamily(u8),

    #[error("unknown {family} event subtype {subtype:#04x}")]
    UnknownEventSubtype { family: EventFamily, subtype: u8 },

    #[error("invalid {what} length {length}")]
    InvalidLength { what: &'static str, length: i64 },
}

/// Result type for decoding operations.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Errors that can occur while writing a log.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer payload of {0} bytes does not fit in a log buffer")]
    BufferTooLarge(usize),
}

/// Result type for writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;
