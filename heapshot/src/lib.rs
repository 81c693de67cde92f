//! Heap snapshots from Mono log profiler logs.
//!
//! The profiler can walk the managed heap on demand and write every live
//! object, its class, its size and its outgoing references into its log.
//! This crate replays those heap walks into immutable, indexed
//! [`HeapSnapshot`]s and answers the usual leak-hunting questions over them:
//!
//! - [`snapshot`] - Object and type tables, reference queries, diffs
//! - [`reference`] - Type-level reference trees, in both directions
//! - [`roots`] - Shortest reference paths from instances back to GC roots
//! - [`graph`] - Type-level graphs of a snapshot or of root paths
//! - [`reader`] - Incremental reading of a log that is still being written
//! - [`report`] - NDJSON and text reports
//!
//! # Example
//!
//! ```no_run
//! use heapshot::progress::NoProgress;
//! use heapshot::reader::LogReader;
//!
//! let mut reader = LogReader::open("app.mlpd").unwrap();
//! reader.read(&NoProgress).unwrap();
//!
//! for snapshot in reader.snapshots() {
//!     println!("{}: {} objects, {} bytes",
//!         snapshot.name(), snapshot.num_objects(), snapshot.total_memory());
//! }
//!
//! let last = reader.snapshots().last().unwrap();
//! let mut tree = last.reference_tree("System.String", true).unwrap();
//! for child in tree.children() {
//!     println!("{} <- {} refs", child.type_name, child.ref_count);
//! }
//! ```

pub mod builder;
pub mod graph;
pub mod progress;
pub mod reader;
pub mod reference;
pub mod report;
pub mod roots;
pub mod snapshot;

use thiserror::Error;

pub use builder::SnapshotBuilder;
pub use reader::{LogReader, ReadOutcome, ReaderConfig};
pub use reference::ReferenceNode;
pub use snapshot::HeapSnapshot;

// Re-export heapshot_parse for convenience
pub use heapshot_parse;

#[derive(Error, Debug)]
pub enum HeapShotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] heapshot_parse::DecodeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("type '{0}' not found in snapshot")]
    TypeNotFound(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(usize),

    #[error("operation cancelled")]
    Cancelled,

    #[error("heap walk too large to index: {objects} objects, {references} references")]
    SnapshotTooLarge { objects: usize, references: usize },
}

pub type Result<T> = std::result::Result<T, HeapShotError>;
