//! Incremental reading of a profiler log.
//!
//! The profiler appends to its log while the application runs. A
//! [`LogReader`] remembers where it stopped, so every call to
//! [`LogReader::read`] decodes only the buffers flushed since the previous
//! call and returns as soon as it reaches an incomplete one.

use crate::builder::SnapshotBuilder;
use crate::progress::{NoProgress, ProgressSink};
use crate::snapshot::HeapSnapshot;
use crate::{HeapShotError, Result};
use heapshot_parse::{ByteCursor, LogBuffer, LogHeader};
use std::fs::File;
use std::io::Write;
use std::net::TcpStream;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// Configuration for a [`LogReader`].
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Return immediately when the file's modification time has not changed
    /// since the last complete pass.
    pub skip_unchanged: bool,
    /// Message passed to the progress sink while reading.
    pub progress_message: String,
    /// Delay between polls in [`LogReader::wait_for_snapshot`].
    pub poll_interval: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            skip_unchanged: true,
            progress_message: "Loading profiler log".to_string(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// What one call to [`LogReader::read`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Indices of the snapshots added by this pass.
    pub new_snapshots: Range<usize>,
    /// Complete buffers decoded.
    pub buffers: usize,
    /// The pass stopped early because the sink asked it to.
    pub cancelled: bool,
    /// The file had not changed; nothing was read.
    pub unchanged: bool,
}

impl ReadOutcome {
    fn empty(at: usize) -> Self {
        Self {
            new_snapshots: at..at,
            buffers: 0,
            cancelled: false,
            unchanged: false,
        }
    }
}

pub struct LogReader {
    path: PathBuf,
    config: ReaderConfig,
    cursor: ByteCursor<File>,
    header: Option<LogHeader>,
    builder: SnapshotBuilder,
    snapshots: Vec<HeapSnapshot>,
    modified: Option<SystemTime>,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, ReaderConfig::default())
    }

    pub fn with_config(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            config,
            cursor: ByteCursor::new(file),
            header: None,
            builder: SnapshotBuilder::new(),
            snapshots: Vec::new(),
            modified: None,
        })
    }

    /// Read the header of a log without building anything. Returns `None`
    /// when the file cannot be opened or does not start with a complete
    /// header.
    pub fn try_read_header(path: impl AsRef<Path>) -> Option<LogHeader> {
        let file = File::open(path).ok()?;
        LogHeader::read(&mut ByteCursor::new(file)).ok().flatten()
    }

    /// Ask a running profiler to walk the heap.
    ///
    /// The profiler listens on the loopback port recorded in the log header.
    pub fn force_snapshot(port: u16) -> Result<()> {
        let mut stream = TcpStream::connect(("127.0.0.1", port))?;
        stream.write_all(b"heapshot\n")?;
        stream.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// The log header, once it has been read.
    pub fn header(&self) -> Option<&LogHeader> {
        self.header.as_ref()
    }

    /// Command port of the profiler, 0 until the header has been read.
    pub fn port(&self) -> u16 {
        self.header.as_ref().map_or(0, |h| h.port)
    }

    /// Snapshots in the order their heap walks ended.
    pub fn snapshots(&self) -> &[HeapSnapshot] {
        &self.snapshots
    }

    pub fn snapshot(&self, index: usize) -> Result<&HeapSnapshot> {
        self.snapshots
            .get(index)
            .ok_or(HeapShotError::SnapshotNotFound(index))
    }

    /// Decode every buffer flushed since the previous pass.
    ///
    /// Cancellation is checked before each buffer. A cancelled pass drops the
    /// heap walk it was in the middle of; snapshots finished before that are
    /// kept. A decode error ends the pass with an error, also keeping earlier
    /// snapshots, and leaves the reader at the start of the failing buffer.
    /// A heap walk too large to index fails the pass after its buffer.
    pub fn read(&mut self, progress: &dyn ProgressSink) -> Result<ReadOutcome> {
        let first_new = self.snapshots.len();

        let modified = std::fs::metadata(&self.path)?.modified().ok();
        if self.config.skip_unchanged && modified.is_some() && modified == self.modified {
            tracing::trace!(path = %self.path.display(), "log unchanged");
            return Ok(ReadOutcome {
                unchanged: true,
                ..ReadOutcome::empty(first_new)
            });
        }

        let started = Instant::now();
        let revision = match &self.header {
            Some(header) => header.revision(),
            None => match LogHeader::read(&mut self.cursor)? {
                Some(header) => {
                    tracing::info!(
                        path = %self.path.display(),
                        format = header.format,
                        pid = header.pid,
                        port = header.port,
                        "opened profiler log"
                    );
                    let revision = header.revision();
                    self.header = Some(header);
                    revision
                }
                None => return Ok(ReadOutcome::empty(first_new)),
            },
        };

        let len = self.cursor.stream_len()?;
        let mut outcome = ReadOutcome::empty(first_new);
        let mut last_percent = None;

        loop {
            if progress.is_cancelled() {
                self.builder.discard_pending();
                outcome.cancelled = true;
                break;
            }

            let buffer = match LogBuffer::read(&mut self.cursor, revision) {
                Ok(Some(buffer)) => buffer,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "stopping at undecodable buffer"
                    );
                    return Err(e.into());
                }
            };
            outcome.buffers += 1;

            for snapshot in self.builder.process_buffer(&buffer)? {
                tracing::info!(
                    snapshot = snapshot.name(),
                    objects = snapshot.num_objects(),
                    total_memory = snapshot.total_memory(),
                    "heap snapshot added"
                );
                self.snapshots.push(snapshot);
            }

            if len > 0 {
                let position = self.cursor.position()?;
                let percent = position.saturating_mul(100) / len;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    progress.report_progress(&self.config.progress_message, percent as f64 / 100.0);
                }
            }
        }

        if !outcome.cancelled {
            self.modified = modified;
        }
        outcome.new_snapshots = first_new..self.snapshots.len();
        tracing::debug!(
            buffers = outcome.buffers,
            new_snapshots = outcome.new_snapshots.len(),
            cancelled = outcome.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "read pass finished"
        );
        Ok(outcome)
    }

    /// Poll the log until a new snapshot appears or `timeout` elapses.
    pub fn wait_for_snapshot(&mut self, timeout: Duration) -> Result<bool> {
        let known = self.snapshots.len();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.read(&NoProgress)?;
            if self.snapshots.len() > known {
                return Ok(true);
            }
            std::thread::sleep(self.config.poll_interval);
        }
        Ok(false)
    }
}
