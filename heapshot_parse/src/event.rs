//! Event grammar.
//!
//! Every event starts with a tag byte. The low nibble selects the
//! [`EventFamily`], the high nibble is family-specific: a subtype, flags, or
//! both. Pointer-like fields are kept exactly as written (deltas against the
//! buffer bases); see [`BufferHeader::pointer`](crate::BufferHeader::pointer)
//! and [`BufferHeader::object`](crate::BufferHeader::object).

use crate::cursor::ByteCursor;
use crate::header::FormatRevision;
use crate::{DecodeError, Result};
use serde::Serialize;
use std::fmt;

// ============================================================================
// Tag constants
// ============================================================================

pub(crate) const TYPE_ALLOC_BT: u8 = 1 << 4;

pub(crate) const TYPE_GC_EVENT: u8 = 1 << 4;
pub(crate) const TYPE_GC_RESIZE: u8 = 2 << 4;
pub(crate) const TYPE_GC_MOVE: u8 = 3 << 4;
pub(crate) const TYPE_GC_HANDLE_CREATED: u8 = 4 << 4;
pub(crate) const TYPE_GC_HANDLE_DESTROYED: u8 = 5 << 4;
pub(crate) const TYPE_GC_HANDLE_CREATED_BT: u8 = 6 << 4;
pub(crate) const TYPE_GC_HANDLE_DESTROYED_BT: u8 = 7 << 4;
pub(crate) const TYPE_GC_FINALIZE_START: u8 = 8 << 4;
pub(crate) const TYPE_GC_FINALIZE_END: u8 = 9 << 4;
pub(crate) const TYPE_GC_FINALIZE_OBJECT_START: u8 = 10 << 4;
pub(crate) const TYPE_GC_FINALIZE_OBJECT_END: u8 = 11 << 4;

pub(crate) const TYPE_METADATA_CLASS: u8 = 1;
pub(crate) const TYPE_METADATA_IMAGE: u8 = 2;
pub(crate) const TYPE_METADATA_ASSEMBLY: u8 = 3;
pub(crate) const TYPE_METADATA_DOMAIN: u8 = 4;
pub(crate) const TYPE_METADATA_THREAD: u8 = 5;
pub(crate) const TYPE_METADATA_CONTEXT: u8 = 6;
pub(crate) const TYPE_METADATA_VTABLE: u8 = 7;

pub(crate) const TYPE_METHOD_LEAVE: u8 = 1 << 4;
pub(crate) const TYPE_METHOD_ENTER: u8 = 2 << 4;
pub(crate) const TYPE_METHOD_EXC_LEAVE: u8 = 3 << 4;
pub(crate) const TYPE_METHOD_JIT: u8 = 4 << 4;

pub(crate) const TYPE_EXCEPTION_CLAUSE: u8 = 1 << 4;
pub(crate) const TYPE_EXCEPTION_BT: u8 = 1 << 7;

pub(crate) const TYPE_MONITOR_BT: u8 = 1 << 7;

pub(crate) const TYPE_HEAP_START: u8 = 0;
pub(crate) const TYPE_HEAP_END: u8 = 1 << 4;
pub(crate) const TYPE_HEAP_OBJECT: u8 = 2 << 4;
pub(crate) const TYPE_HEAP_ROOT: u8 = 3 << 4;

pub(crate) const TYPE_SAMPLE_HIT: u8 = 0;
pub(crate) const TYPE_SAMPLE_USYM: u8 = 1 << 4;
pub(crate) const TYPE_SAMPLE_UBIN: u8 = 2 << 4;
pub(crate) const TYPE_SAMPLE_COUNTERS_DESC: u8 = 3 << 4;
pub(crate) const TYPE_SAMPLE_COUNTERS: u8 = 4 << 4;

pub(crate) const TYPE_JITHELPER: u8 = 1 << 4;

pub(crate) const TYPE_COVERAGE_ASSEMBLY: u8 = 0;
pub(crate) const TYPE_COVERAGE_METHOD: u8 = 1 << 4;
pub(crate) const TYPE_COVERAGE_STATEMENT: u8 = 2 << 4;
pub(crate) const TYPE_COVERAGE_CLASS: u8 = 3 << 4;

pub(crate) const TYPE_SYNC_POINT: u8 = 0;

/// Counter section whose name is written inline.
pub(crate) const PROFILER_COUNTER_SECTION: u64 = 0x8000;

pub(crate) const COUNTER_TYPE_INT: u8 = 0;
pub(crate) const COUNTER_TYPE_UINT: u8 = 1;
pub(crate) const COUNTER_TYPE_WORD: u8 = 2;
pub(crate) const COUNTER_TYPE_LONG: u8 = 3;
pub(crate) const COUNTER_TYPE_ULONG: u8 = 4;
pub(crate) const COUNTER_TYPE_DOUBLE: u8 = 5;
pub(crate) const COUNTER_TYPE_STRING: u8 = 6;
pub(crate) const COUNTER_TYPE_TIME_INTERVAL: u8 = 7;

/// JIT helper buffer kind that carries a name.
pub(crate) const JIT_HELPER_SPECIFIC_TRAMPOLINE: u8 = 5;

// ============================================================================
// Families
// ============================================================================

/// Event family, selected by the low nibble of the tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFamily {
    Alloc = 0,
    Gc = 1,
    Metadata = 2,
    Method = 3,
    Exception = 4,
    Monitor = 5,
    Heap = 6,
    Sample = 7,
    Runtime = 8,
    Coverage = 9,
    Meta = 10,
}

impl EventFamily {
    pub const ALL: [EventFamily; 11] = [
        EventFamily::Alloc,
        EventFamily::Gc,
        EventFamily::Metadata,
        EventFamily::Method,
        EventFamily::Exception,
        EventFamily::Monitor,
        EventFamily::Heap,
        EventFamily::Sample,
        EventFamily::Runtime,
        EventFamily::Coverage,
        EventFamily::Meta,
    ];

    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Self::ALL.get(usize::from(nibble)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            EventFamily::Alloc => "alloc",
            EventFamily::Gc => "gc",
            EventFamily::Metadata => "metadata",
            EventFamily::Method => "method",
            EventFamily::Exception => "exception",
            EventFamily::Monitor => "monitor",
            EventFamily::Heap => "heap",
            EventFamily::Sample => "sample",
            EventFamily::Runtime => "runtime",
            EventFamily::Coverage => "coverage",
            EventFamily::Meta => "meta",
        }
    }

    /// Families the legacy layouts define.
    fn exists_in(self, revision: FormatRevision) -> bool {
        revision.is_current() || (self as u8) <= EventFamily::Sample as u8
    }
}

impl fmt::Display for EventFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// A managed call stack captured with an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Backtrace {
    /// Only present in legacy logs, always zero otherwise.
    pub flags: u64,
    /// Method pointers, as deltas.
    pub frames: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocEvent {
    pub class: i64,
    pub object: i64,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Backtrace>,
}

/// Phase reported by a GC event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcEventKind {
    Start,
    MarkStart,
    MarkEnd,
    ReclaimStart,
    ReclaimEnd,
    End,
    PreStopWorld,
    PostStopWorld,
    PreStartWorld,
    PostStartWorld,
    Other(u64),
}

impl GcEventKind {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => GcEventKind::Start,
            1 => GcEventKind::MarkStart,
            2 => GcEventKind::MarkEnd,
            3 => GcEventKind::ReclaimStart,
            4 => GcEventKind::ReclaimEnd,
            5 => GcEventKind::End,
            6 => GcEventKind::PreStopWorld,
            7 => GcEventKind::PostStopWorld,
            8 => GcEventKind::PreStartWorld,
            9 => GcEventKind::PostStartWorld,
            other => GcEventKind::Other(other),
        }
    }

    pub fn code(self) -> u64 {
        match self {
            GcEventKind::Start => 0,
            GcEventKind::MarkStart => 1,
            GcEventKind::MarkEnd => 2,
            GcEventKind::ReclaimStart => 3,
            GcEventKind::ReclaimEnd => 4,
            GcEventKind::End => 5,
            GcEventKind::PreStopWorld => 6,
            GcEventKind::PostStopWorld => 7,
            GcEventKind::PreStartWorld => 8,
            GcEventKind::PostStartWorld => 9,
            GcEventKind::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GcEvent {
    Event {
        event: GcEventKind,
        generation: u64,
    },
    Resize {
        heap_size: u64,
    },
    Move {
        objects: Vec<i64>,
    },
    HandleCreated {
        handle_type: u64,
        handle: u64,
        object: i64,
        backtrace: Option<Backtrace>,
    },
    HandleDestroyed {
        handle_type: u64,
        handle: u64,
        backtrace: Option<Backtrace>,
    },
    FinalizeStart,
    FinalizeEnd,
    FinalizeObjectStart {
        object: i64,
    },
    FinalizeObjectEnd {
        object: i64,
    },
}

impl GcEvent {
    /// True for the event that opens a collection, and with it a heap walk.
    pub fn is_start(&self) -> bool {
        matches!(
            self,
            GcEvent::Event {
                event: GcEventKind::Start,
                ..
            }
        )
    }
}

/// Kind of runtime entity a metadata event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Class,
    Image,
    Assembly,
    Domain,
    Thread,
    Context,
    VTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataEvent {
    Class {
        pointer: i64,
        image: i64,
        name: String,
    },
    Image {
        pointer: i64,
        name: String,
    },
    Assembly {
        pointer: i64,
        image: Option<i64>,
        name: Option<String>,
    },
    Domain {
        pointer: i64,
        name: Option<String>,
    },
    Thread {
        pointer: i64,
        name: Option<String>,
    },
    Context {
        pointer: i64,
        domain: i64,
    },
    #[serde(rename = "vtable")]
    VTable {
        pointer: i64,
        domain: i64,
        class: i64,
    },
}

impl MetadataEvent {
    pub fn kind(&self) -> MetadataKind {
        match self {
            MetadataEvent::Class { .. } => MetadataKind::Class,
            MetadataEvent::Image { .. } => MetadataKind::Image,
            MetadataEvent::Assembly { .. } => MetadataKind::Assembly,
            MetadataEvent::Domain { .. } => MetadataKind::Domain,
            MetadataEvent::Thread { .. } => MetadataKind::Thread,
            MetadataEvent::Context { .. } => MetadataKind::Context,
            MetadataEvent::VTable { .. } => MetadataKind::VTable,
        }
    }

    pub fn pointer(&self) -> i64 {
        match *self {
            MetadataEvent::Class { pointer, .. }
            | MetadataEvent::Image { pointer, .. }
            | MetadataEvent::Assembly { pointer, .. }
            | MetadataEvent::Domain { pointer, .. }
            | MetadataEvent::Thread { pointer, .. }
            | MetadataEvent::Context { pointer, .. }
            | MetadataEvent::VTable { pointer, .. } => pointer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodEvent {
    Leave {
        method: i64,
    },
    Enter {
        method: i64,
    },
    ExceptionLeave {
        method: i64,
    },
    Jit {
        method: i64,
        code_address: i64,
        code_size: u64,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExceptionEvent {
    Throw {
        object: i64,
        backtrace: Option<Backtrace>,
    },
    Clause {
        clause_type: u64,
        clause_index: u64,
        method: i64,
        /// Exception object; current revision only.
        object: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventKind {
    Contention,
    Done,
    Fail,
    Other(u8),
}

impl MonitorEventKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MonitorEventKind::Contention,
            2 => MonitorEventKind::Done,
            3 => MonitorEventKind::Fail,
            other => MonitorEventKind::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            MonitorEventKind::Contention => 1,
            MonitorEventKind::Done => 2,
            MonitorEventKind::Fail => 3,
            MonitorEventKind::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorEvent {
    pub kind: MonitorEventKind,
    pub object: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Backtrace>,
}

/// One outgoing reference of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapReference {
    /// Field offset, relative to the previous reference of the same object.
    pub offset: u64,
    pub object: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapObject {
    pub object: i64,
    pub class: i64,
    pub size: u64,
    pub references: Vec<HeapReference>,
}

/// Kind of a GC root, from the low byte of the root type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootKind {
    Stack,
    Finalizer,
    Handle,
    Other,
    Misc,
}

impl RootKind {
    pub const PINNING: u64 = 1 << 8;
    pub const WEAK_REF: u64 = 2 << 8;
    pub const INTERIOR: u64 = 4 << 8;
    pub const TYPE_MASK: u64 = 0xff;

    pub fn from_root_type(root_type: u64) -> Self {
        match root_type & Self::TYPE_MASK {
            0 => RootKind::Stack,
            1 => RootKind::Finalizer,
            2 => RootKind::Handle,
            3 => RootKind::Other,
            _ => RootKind::Misc,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            RootKind::Stack => 0,
            RootKind::Finalizer => 1,
            RootKind::Handle => 2,
            RootKind::Other => 3,
            RootKind::Misc => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapRootEntry {
    pub object: i64,
    /// Root kind in the low byte, flags above it.
    pub root_type: u64,
    pub extra: u64,
}

impl HeapRootEntry {
    pub fn kind(&self) -> RootKind {
        RootKind::from_root_type(self.root_type)
    }

    pub fn is_pinning(&self) -> bool {
        self.root_type & RootKind::PINNING != 0
    }

    pub fn is_weak(&self) -> bool {
        self.root_type & RootKind::WEAK_REF != 0
    }

    pub fn is_interior(&self) -> bool {
        self.root_type & RootKind::INTERIOR != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapRoot {
    pub gc_count: u64,
    pub entries: Vec<HeapRootEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeapEvent {
    Start,
    End,
    Object(HeapObject),
    Root(HeapRoot),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterDescription {
    pub section: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    pub name: String,
    pub counter_type: u8,
    pub unit: u8,
    pub variance: u8,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterData {
    Int(i64),
    UInt(u64),
    Double(f64),
    String(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterValue {
    pub index: u64,
    pub counter_type: u8,
    pub value: CounterData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SampleEvent {
    Hit {
        /// Legacy only.
        sample_type: Option<u64>,
        /// Legacy only; current logs use the event time.
        timestamp: Option<u64>,
        /// Current only.
        thread: Option<i64>,
        ips: Vec<i64>,
        methods: Vec<i64>,
    },
    USym {
        address: i64,
        size: u64,
        name: String,
    },
    UBin {
        address: i64,
        offset: u64,
        size: u64,
        name: String,
    },
    CountersDesc {
        counters: Vec<CounterDescription>,
    },
    Counters {
        values: Vec<CounterValue>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEvent {
    JitHelper {
        buffer_type: u8,
        address: i64,
        size: u64,
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoverageEvent {
    Assembly {
        name: String,
        guid: String,
        filename: String,
        methods: u64,
        fully_covered: u64,
        partially_covered: u64,
    },
    Method {
        assembly: String,
        class: String,
        name: String,
        signature: String,
        filename: String,
        token: u64,
        method_id: u64,
        len: u64,
    },
    Statement {
        method_id: u64,
        offset: u64,
        counter: u64,
        line: u64,
        column: u64,
    },
    Class {
        assembly: String,
        class: String,
        methods: u64,
        fully_covered: u64,
        partially_covered: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetaEvent {
    SyncPoint { sync_type: u8 },
}

/// A decoded event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "family", content = "data", rename_all = "snake_case")]
pub enum LogEvent {
    Alloc(AllocEvent),
    Gc(GcEvent),
    Metadata(MetadataEvent),
    Method(MethodEvent),
    Exception(ExceptionEvent),
    Monitor(MonitorEvent),
    Heap(HeapEvent),
    Sample(SampleEvent),
    Runtime(RuntimeEvent),
    Coverage(CoverageEvent),
    Meta(MetaEvent),
}

// ============================================================================
// Decoding
// ============================================================================

impl LogEvent {
    /// Decode one event from the loaded window.
    ///
    /// Returns the event's time delta together with the event. Events that
    /// carry no time in the given revision report a delta of zero.
    pub fn read<R>(cursor: &mut ByteCursor<R>, revision: FormatRevision) -> Result<(u64, Self)> {
        let tag = cursor.read_u8()?;
        let exinfo = tag & 0xf0;
        let family = EventFamily::from_nibble(tag & 0x0f)
            .filter(|family| family.exists_in(revision))
            .ok_or(DecodeError::UnknownEventFamily(tag & 0x0f))?;

        let mut decoder = Decoder {
            cursor,
            revision,
            exinfo,
            family,
        };
        decoder.decode()
    }

    pub fn family(&self) -> EventFamily {
        match self {
            LogEvent::Alloc(_) => EventFamily::Alloc,
            LogEvent::Gc(_) => EventFamily::Gc,
            LogEvent::Metadata(_) => EventFamily::Metadata,
            LogEvent::Method(_) => EventFamily::Method,
            LogEvent::Exception(_) => EventFamily::Exception,
            LogEvent::Monitor(_) => EventFamily::Monitor,
            LogEvent::Heap(_) => EventFamily::Heap,
            LogEvent::Sample(_) => EventFamily::Sample,
            LogEvent::Runtime(_) => EventFamily::Runtime,
            LogEvent::Coverage(_) => EventFamily::Coverage,
            LogEvent::Meta(_) => EventFamily::Meta,
        }
    }
}

struct Decoder<'a, R> {
    cursor: &'a mut ByteCursor<R>,
    revision: FormatRevision,
    exinfo: u8,
    family: EventFamily,
}

impl<R> Decoder<'_, R> {
    fn decode(&mut self) -> Result<(u64, LogEvent)> {
        match self.family {
            EventFamily::Alloc => self.alloc(),
            EventFamily::Gc => self.gc(),
            EventFamily::Metadata => self.metadata(),
            EventFamily::Method => self.method(),
            EventFamily::Exception => self.exception(),
            EventFamily::Monitor => self.monitor(),
            EventFamily::Heap => self.heap(),
            EventFamily::Sample => self.sample(),
            EventFamily::Runtime => self.runtime(),
            EventFamily::Coverage => self.coverage(),
            EventFamily::Meta => self.meta(),
        }
    }

    fn current(&self) -> bool {
        self.revision.is_current()
    }

    fn unknown_subtype(&self) -> DecodeError {
        DecodeError::UnknownEventSubtype {
            family: self.family,
            subtype: self.exinfo,
        }
    }

    fn time(&mut self) -> Result<u64> {
        self.cursor.read_uleb128()
    }

    /// Time delta for events that only carry one in the current revision.
    fn current_time(&mut self) -> Result<u64> {
        if self.current() { self.time() } else { Ok(0) }
    }

    fn count(&mut self) -> Result<usize> {
        let count = self.cursor.read_uleb128()?;
        // every element takes at least one byte
        if count > self.cursor.remaining() as u64 {
            return Err(DecodeError::InvalidLength {
                what: "element count",
                length: i64::try_from(count).unwrap_or(i64::MAX),
            });
        }
        Ok(count as usize)
    }

    fn sleb_list(&mut self, count: usize) -> Result<Vec<i64>> {
        (0..count).map(|_| self.cursor.read_sleb128()).collect()
    }

    fn backtrace(&mut self) -> Result<Backtrace> {
        let flags = if self.current() {
            0
        } else {
            self.cursor.read_uleb128()?
        };
        let count = self.count()?;
        Ok(Backtrace {
            flags,
            frames: self.sleb_list(count)?,
        })
    }

    fn alloc(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let event = AllocEvent {
            class: self.cursor.read_sleb128()?,
            object: self.cursor.read_sleb128()?,
            size: self.cursor.read_uleb128()?,
            backtrace: if self.exinfo & TYPE_ALLOC_BT != 0 {
                Some(self.backtrace()?)
            } else {
                None
            },
        };
        Ok((time, LogEvent::Alloc(event)))
    }

    fn gc(&mut self) -> Result<(u64, LogEvent)> {
        let legacy_subtype = self.exinfo <= TYPE_GC_HANDLE_DESTROYED;
        if !self.current() && !legacy_subtype {
            return Err(self.unknown_subtype());
        }

        let time = self.time()?;
        let event = match self.exinfo {
            TYPE_GC_EVENT => {
                let (event, generation) = if self.current() {
                    (
                        u64::from(self.cursor.read_u8()?),
                        u64::from(self.cursor.read_u8()?),
                    )
                } else {
                    (self.cursor.read_uleb128()?, self.cursor.read_uleb128()?)
                };
                GcEvent::Event {
                    event: GcEventKind::from_code(event),
                    generation,
                }
            }
            TYPE_GC_RESIZE => GcEvent::Resize {
                heap_size: self.cursor.read_uleb128()?,
            },
            TYPE_GC_MOVE => {
                let count = self.count()?;
                GcEvent::Move {
                    objects: self.sleb_list(count)?,
                }
            }
            TYPE_GC_HANDLE_CREATED | TYPE_GC_HANDLE_CREATED_BT => GcEvent::HandleCreated {
                handle_type: self.cursor.read_uleb128()?,
                handle: self.cursor.read_uleb128()?,
                object: self.cursor.read_sleb128()?,
                backtrace: if self.exinfo == TYPE_GC_HANDLE_CREATED_BT {
                    Some(self.backtrace()?)
                } else {
                    None
                },
            },
            TYPE_GC_HANDLE_DESTROYED | TYPE_GC_HANDLE_DESTROYED_BT => GcEvent::HandleDestroyed {
                handle_type: self.cursor.read_uleb128()?,
                handle: self.cursor.read_uleb128()?,
                backtrace: if self.exinfo == TYPE_GC_HANDLE_DESTROYED_BT {
                    Some(self.backtrace()?)
                } else {
                    None
                },
            },
            TYPE_GC_FINALIZE_START => GcEvent::FinalizeStart,
            TYPE_GC_FINALIZE_END => GcEvent::FinalizeEnd,
            TYPE_GC_FINALIZE_OBJECT_START => GcEvent::FinalizeObjectStart {
                object: self.cursor.read_sleb128()?,
            },
            TYPE_GC_FINALIZE_OBJECT_END => GcEvent::FinalizeObjectEnd {
                object: self.cursor.read_sleb128()?,
            },
            _ => return Err(self.unknown_subtype()),
        };
        Ok((time, LogEvent::Gc(event)))
    }

    fn metadata(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let mtype = self.cursor.read_u8()?;
        let pointer = self.cursor.read_sleb128()?;
        let current = self.current();

        let event = match mtype {
            TYPE_METADATA_CLASS => {
                let image = self.cursor.read_sleb128()?;
                if !current {
                    self.cursor.read_uleb128()?;
                }
                MetadataEvent::Class {
                    pointer,
                    image,
                    name: self.cursor.read_cstring()?,
                }
            }
            TYPE_METADATA_IMAGE => {
                if !current {
                    self.cursor.read_uleb128()?;
                }
                MetadataEvent::Image {
                    pointer,
                    name: self.cursor.read_cstring()?,
                }
            }
            TYPE_METADATA_ASSEMBLY if current => MetadataEvent::Assembly {
                pointer,
                image: Some(self.cursor.read_sleb128()?),
                name: Some(self.cursor.read_cstring()?),
            },
            TYPE_METADATA_ASSEMBLY => MetadataEvent::Assembly {
                pointer,
                image: None,
                name: None,
            },
            TYPE_METADATA_DOMAIN => MetadataEvent::Domain {
                pointer,
                name: if current && self.exinfo == 0 {
                    Some(self.cursor.read_cstring()?)
                } else {
                    None
                },
            },
            TYPE_METADATA_THREAD => {
                let name = if current {
                    if self.exinfo == 0 {
                        Some(self.cursor.read_cstring()?)
                    } else {
                        None
                    }
                } else {
                    self.cursor.read_uleb128()?;
                    Some(self.cursor.read_cstring()?)
                };
                MetadataEvent::Thread { pointer, name }
            }
            TYPE_METADATA_CONTEXT if current => MetadataEvent::Context {
                pointer,
                domain: self.cursor.read_sleb128()?,
            },
            TYPE_METADATA_VTABLE if current => MetadataEvent::VTable {
                pointer,
                domain: self.cursor.read_sleb128()?,
                class: self.cursor.read_sleb128()?,
            },
            _ => {
                return Err(DecodeError::UnknownEventSubtype {
                    family: EventFamily::Metadata,
                    subtype: mtype,
                });
            }
        };
        Ok((time, LogEvent::Metadata(event)))
    }

    fn method(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let method = self.cursor.read_sleb128()?;
        let event = match self.exinfo {
            TYPE_METHOD_LEAVE => MethodEvent::Leave { method },
            TYPE_METHOD_ENTER => MethodEvent::Enter { method },
            TYPE_METHOD_EXC_LEAVE => MethodEvent::ExceptionLeave { method },
            TYPE_METHOD_JIT => MethodEvent::Jit {
                method,
                code_address: self.cursor.read_sleb128()?,
                code_size: self.cursor.read_uleb128()?,
                name: self.cursor.read_cstring()?,
            },
            _ => return Err(self.unknown_subtype()),
        };
        Ok((time, LogEvent::Method(event)))
    }

    fn exception(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let event = if self.exinfo & 0x70 == TYPE_EXCEPTION_CLAUSE {
            if self.current() {
                ExceptionEvent::Clause {
                    clause_type: u64::from(self.cursor.read_u8()?),
                    clause_index: self.cursor.read_uleb128()?,
                    method: self.cursor.read_sleb128()?,
                    object: Some(self.cursor.read_sleb128()?),
                }
            } else {
                ExceptionEvent::Clause {
                    clause_type: self.cursor.read_uleb128()?,
                    clause_index: self.cursor.read_uleb128()?,
                    method: self.cursor.read_sleb128()?,
                    object: None,
                }
            }
        } else if self.exinfo & 0x70 == 0 {
            ExceptionEvent::Throw {
                object: self.cursor.read_sleb128()?,
                backtrace: if self.exinfo & TYPE_EXCEPTION_BT != 0 {
                    Some(self.backtrace()?)
                } else {
                    None
                },
            }
        } else {
            return Err(self.unknown_subtype());
        };
        Ok((time, LogEvent::Exception(event)))
    }

    fn monitor(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let (kind, object) = if self.current() {
            let kind = MonitorEventKind::from_code(self.cursor.read_u8()?);
            (kind, self.cursor.read_sleb128()?)
        } else {
            let object = self.cursor.read_sleb128()?;
            (MonitorEventKind::from_code((self.exinfo >> 4) & 0x3), object)
        };
        let wants_backtrace = self.exinfo & TYPE_MONITOR_BT != 0
            && (self.current() || kind == MonitorEventKind::Contention);
        let backtrace = if wants_backtrace {
            Some(self.backtrace()?)
        } else {
            None
        };
        Ok((
            time,
            LogEvent::Monitor(MonitorEvent {
                kind,
                object,
                backtrace,
            }),
        ))
    }

    fn heap(&mut self) -> Result<(u64, LogEvent)> {
        let (time, event) = match self.exinfo {
            TYPE_HEAP_START => (self.time()?, HeapEvent::Start),
            TYPE_HEAP_END => (self.time()?, HeapEvent::End),
            TYPE_HEAP_OBJECT => {
                let time = self.current_time()?;
                let object = self.cursor.read_sleb128()?;
                let class = self.cursor.read_sleb128()?;
                let size = self.cursor.read_uleb128()?;
                let count = self.count()?;
                let mut references = Vec::with_capacity(count);
                for _ in 0..count {
                    references.push(HeapReference {
                        offset: self.cursor.read_uleb128()?,
                        object: self.cursor.read_sleb128()?,
                    });
                }
                (
                    time,
                    HeapEvent::Object(HeapObject {
                        object,
                        class,
                        size,
                        references,
                    }),
                )
            }
            TYPE_HEAP_ROOT => {
                let time = self.current_time()?;
                let count = self.count()?;
                let gc_count = self.cursor.read_uleb128()?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(HeapRootEntry {
                        object: self.cursor.read_sleb128()?,
                        root_type: self.cursor.read_uleb128()?,
                        extra: self.cursor.read_uleb128()?,
                    });
                }
                (time, HeapEvent::Root(HeapRoot { gc_count, entries }))
            }
            _ => return Err(self.unknown_subtype()),
        };
        Ok((time, LogEvent::Heap(event)))
    }

    fn sample(&mut self) -> Result<(u64, LogEvent)> {
        let (time, event) = match self.exinfo {
            TYPE_SAMPLE_HIT if self.current() => {
                let time = self.time()?;
                let thread = self.cursor.read_sleb128()?;
                let count = self.count()?;
                let ips = self.sleb_list(count)?;
                let count = self.count()?;
                let methods = self.sleb_list(count)?;
                (
                    time,
                    SampleEvent::Hit {
                        sample_type: None,
                        timestamp: None,
                        thread: Some(thread),
                        ips,
                        methods,
                    },
                )
            }
            TYPE_SAMPLE_HIT => {
                let sample_type = self.cursor.read_uleb128()?;
                let timestamp = self.cursor.read_uleb128()?;
                let count = self.count()?;
                (
                    0,
                    SampleEvent::Hit {
                        sample_type: Some(sample_type),
                        timestamp: Some(timestamp),
                        thread: None,
                        ips: self.sleb_list(count)?,
                        methods: Vec::new(),
                    },
                )
            }
            TYPE_SAMPLE_USYM => (
                self.current_time()?,
                SampleEvent::USym {
                    address: self.cursor.read_sleb128()?,
                    size: self.cursor.read_uleb128()?,
                    name: self.cursor.read_cstring()?,
                },
            ),
            TYPE_SAMPLE_UBIN => (
                self.time()?,
                SampleEvent::UBin {
                    address: self.cursor.read_sleb128()?,
                    offset: self.cursor.read_uleb128()?,
                    size: self.cursor.read_uleb128()?,
                    name: self.cursor.read_cstring()?,
                },
            ),
            TYPE_SAMPLE_COUNTERS_DESC if self.current() => {
                let time = self.time()?;
                (
                    time,
                    SampleEvent::CountersDesc {
                        counters: self.counter_descriptions()?,
                    },
                )
            }
            TYPE_SAMPLE_COUNTERS if self.current() => {
                let time = self.time()?;
                (
                    time,
                    SampleEvent::Counters {
                        values: self.counter_values()?,
                    },
                )
            }
            _ => return Err(self.unknown_subtype()),
        };
        Ok((time, LogEvent::Sample(event)))
    }

    fn counter_descriptions(&mut self) -> Result<Vec<CounterDescription>> {
        let count = self.count()?;
        let mut descriptions = Vec::with_capacity(count);
        for _ in 0..count {
            let section = self.cursor.read_uleb128()?;
            let section_name = if section == PROFILER_COUNTER_SECTION {
                Some(self.cursor.read_cstring()?)
            } else {
                None
            };
            descriptions.push(CounterDescription {
                section,
                section_name,
                name: self.cursor.read_cstring()?,
                counter_type: self.cursor.read_u8()?,
                unit: self.cursor.read_u8()?,
                variance: self.cursor.read_u8()?,
                index: self.cursor.read_uleb128()?,
            });
        }
        Ok(descriptions)
    }

    fn counter_values(&mut self) -> Result<Vec<CounterValue>> {
        let mut values = Vec::new();
        loop {
            let index = self.cursor.read_uleb128()?;
            if index == 0 {
                return Ok(values);
            }
            let counter_type = self.cursor.read_u8()?;
            let value = match counter_type {
                COUNTER_TYPE_INT | COUNTER_TYPE_WORD | COUNTER_TYPE_LONG
                | COUNTER_TYPE_TIME_INTERVAL => CounterData::Int(self.cursor.read_sleb128()?),
                COUNTER_TYPE_UINT | COUNTER_TYPE_ULONG => {
                    CounterData::UInt(self.cursor.read_uleb128()?)
                }
                COUNTER_TYPE_DOUBLE => CounterData::Double(self.cursor.read_f64()?),
                COUNTER_TYPE_STRING => {
                    if self.cursor.read_u8()? == 1 {
                        CounterData::String(Some(self.cursor.read_cstring()?))
                    } else {
                        CounterData::String(None)
                    }
                }
                other => {
                    return Err(DecodeError::UnknownEventSubtype {
                        family: EventFamily::Sample,
                        subtype: other,
                    });
                }
            };
            values.push(CounterValue {
                index,
                counter_type,
                value,
            });
        }
    }

    fn runtime(&mut self) -> Result<(u64, LogEvent)> {
        if self.exinfo != TYPE_JITHELPER {
            return Err(self.unknown_subtype());
        }
        let time = self.time()?;
        let buffer_type = self.cursor.read_u8()?;
        let address = self.cursor.read_sleb128()?;
        let size = self.cursor.read_uleb128()?;
        let name = if buffer_type == JIT_HELPER_SPECIFIC_TRAMPOLINE {
            Some(self.cursor.read_cstring()?)
        } else {
            None
        };
        Ok((
            time,
            LogEvent::Runtime(RuntimeEvent::JitHelper {
                buffer_type,
                address,
                size,
                name,
            }),
        ))
    }

    fn coverage(&mut self) -> Result<(u64, LogEvent)> {
        let time = self.time()?;
        let unknown = self.unknown_subtype();
        let exinfo = self.exinfo;
        let c = &mut *self.cursor;
        let event = match exinfo {
            TYPE_COVERAGE_ASSEMBLY => CoverageEvent::Assembly {
                name: c.read_cstring()?,
                guid: c.read_cstring()?,
                filename: c.read_cstring()?,
                methods: c.read_uleb128()?,
                fully_covered: c.read_uleb128()?,
                partially_covered: c.read_uleb128()?,
            },
            TYPE_COVERAGE_METHOD => CoverageEvent::Method {
                assembly: c.read_cstring()?,
                class: c.read_cstring()?,
                name: c.read_cstring()?,
                signature: c.read_cstring()?,
                filename: c.read_cstring()?,
                token: c.read_uleb128()?,
                method_id: c.read_uleb128()?,
                len: c.read_uleb128()?,
            },
            TYPE_COVERAGE_STATEMENT => CoverageEvent::Statement {
                method_id: c.read_uleb128()?,
                offset: c.read_uleb128()?,
                counter: c.read_uleb128()?,
                line: c.read_uleb128()?,
                column: c.read_uleb128()?,
            },
            TYPE_COVERAGE_CLASS => CoverageEvent::Class {
                assembly: c.read_cstring()?,
                class: c.read_cstring()?,
                methods: c.read_uleb128()?,
                fully_covered: c.read_uleb128()?,
                partially_covered: c.read_uleb128()?,
            },
            _ => return Err(unknown),
        };
        Ok((time, LogEvent::Coverage(event)))
    }

    fn meta(&mut self) -> Result<(u64, LogEvent)> {
        if self.exinfo != TYPE_SYNC_POINT {
            return Err(self.unknown_subtype());
        }
        let time = self.time()?;
        Ok((
            time,
            LogEvent::Meta(MetaEvent::SyncPoint {
                sync_type: self.cursor.read_u8()?,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{BufferWriter, encode_sleb128, encode_uleb128};
    use std::io::Cursor;

    fn decode_all(bytes: &[u8], revision: FormatRevision) -> Result<Vec<(u64, LogEvent)>> {
        let mut cursor = ByteCursor::new(Cursor::new(bytes.to_vec()));
        assert!(cursor.load_data(bytes.len()).unwrap());
        let mut events = Vec::new();
        while !cursor.is_exhausted() {
            events.push(LogEvent::read(&mut cursor, revision)?);
        }
        Ok(events)
    }

    fn encoded(events: &[(u64, LogEvent)]) -> Vec<u8> {
        let mut buffer = BufferWriter::new();
        for (time, event) in events {
            buffer.push(*time, event);
        }
        buffer.payload().to_vec()
    }

    fn uleb(v: u64, out: &mut Vec<u8>) {
        encode_uleb128(v, out);
    }

    fn sleb(v: i64, out: &mut Vec<u8>) {
        encode_sleb128(v, out);
    }

    #[test]
    fn unknown_family_is_fatal() {
        let err = decode_all(&[0x0b], FormatRevision::Current).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventFamily(11)));

        // runtime events do not exist in legacy logs
        let err = decode_all(&[0x18, 0x00], FormatRevision::Legacy).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventFamily(8)));
    }

    #[test]
    fn unknown_subtype_is_fatal() {
        let err = decode_all(&[(7 << 4) | 6, 0x00], FormatRevision::Current).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownEventSubtype {
                family: EventFamily::Heap,
                subtype: 0x70
            }
        ));

        let mut bytes = vec![0x02, 0x00, 0x09];
        sleb(0, &mut bytes);
        let err = decode_all(&bytes, FormatRevision::Current).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnknownEventSubtype {
                family: EventFamily::Metadata,
                subtype: 9
            }
        ));
    }

    #[test]
    fn current_heap_events() {
        let events = vec![
            (
                5,
                LogEvent::Gc(GcEvent::Event {
                    event: GcEventKind::Start,
                    generation: 1,
                }),
            ),
            (1, LogEvent::Heap(HeapEvent::Start)),
            (
                2,
                LogEvent::Heap(HeapEvent::Object(HeapObject {
                    object: 0x40,
                    class: -0x18,
                    size: 32,
                    references: vec![
                        HeapReference {
                            offset: 16,
                            object: 0x80,
                        },
                        HeapReference {
                            offset: 8,
                            object: -0x20,
                        },
                    ],
                })),
            ),
            (
                0,
                LogEvent::Heap(HeapEvent::Root(HeapRoot {
                    gc_count: 3,
                    entries: vec![HeapRootEntry {
                        object: 0x40,
                        root_type: RootKind::PINNING | 2,
                        extra: 0,
                    }],
                })),
            ),
            (9, LogEvent::Heap(HeapEvent::End)),
        ];
        let decoded = decode_all(&encoded(&events), FormatRevision::Current).unwrap();
        assert_eq!(decoded, events);

        let LogEvent::Heap(HeapEvent::Root(root)) = &decoded[3].1 else {
            panic!("expected a root event");
        };
        assert_eq!(root.entries[0].kind(), RootKind::Handle);
        assert!(root.entries[0].is_pinning());
        assert!(!root.entries[0].is_weak());
    }

    #[test]
    fn legacy_heap_object_has_no_time() {
        let mut bytes = vec![TYPE_HEAP_OBJECT | 6];
        sleb(0x10, &mut bytes);
        sleb(-8, &mut bytes);
        uleb(24, &mut bytes);
        uleb(1, &mut bytes);
        uleb(8, &mut bytes);
        sleb(0x30, &mut bytes);

        let decoded = decode_all(&bytes, FormatRevision::Legacy).unwrap();
        assert_eq!(
            decoded,
            vec![(
                0,
                LogEvent::Heap(HeapEvent::Object(HeapObject {
                    object: 0x10,
                    class: -8,
                    size: 24,
                    references: vec![HeapReference {
                        offset: 8,
                        object: 0x30
                    }],
                }))
            )]
        );
    }

    #[test]
    fn legacy_gc_event_uses_varints() {
        let mut bytes = vec![TYPE_GC_EVENT | 1];
        uleb(100, &mut bytes);
        uleb(5, &mut bytes);
        uleb(2, &mut bytes);
        let decoded = decode_all(&bytes, FormatRevision::Legacy).unwrap();
        assert_eq!(
            decoded[0],
            (
                100,
                LogEvent::Gc(GcEvent::Event {
                    event: GcEventKind::End,
                    generation: 2
                })
            )
        );

        // finalizer events only exist in the current layout
        let err = decode_all(&[TYPE_GC_FINALIZE_START | 1, 0], FormatRevision::Legacy).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventSubtype { .. }));
    }

    #[test]
    fn legacy_metadata_carries_flags() {
        let mut bytes = vec![2];
        uleb(7, &mut bytes);
        bytes.push(TYPE_METADATA_CLASS);
        sleb(0x100, &mut bytes);
        sleb(0x200, &mut bytes);
        uleb(0, &mut bytes);
        bytes.extend_from_slice(b"Foo.Bar\0");

        bytes.push(2);
        uleb(1, &mut bytes);
        bytes.push(TYPE_METADATA_THREAD);
        sleb(0x300, &mut bytes);
        uleb(0, &mut bytes);
        bytes.extend_from_slice(b"Finalizer\0");

        let decoded = decode_all(&bytes, FormatRevision::Legacy).unwrap();
        assert_eq!(
            decoded,
            vec![
                (
                    7,
                    LogEvent::Metadata(MetadataEvent::Class {
                        pointer: 0x100,
                        image: 0x200,
                        name: "Foo.Bar".to_string(),
                    })
                ),
                (
                    1,
                    LogEvent::Metadata(MetadataEvent::Thread {
                        pointer: 0x300,
                        name: Some("Finalizer".to_string()),
                    })
                ),
            ]
        );
    }

    #[test]
    fn current_thread_name_depends_on_exinfo() {
        let mut bytes = vec![0x10 | 2];
        uleb(0, &mut bytes);
        bytes.push(TYPE_METADATA_THREAD);
        sleb(0x300, &mut bytes);

        let decoded = decode_all(&bytes, FormatRevision::Current).unwrap();
        assert_eq!(
            decoded[0].1,
            LogEvent::Metadata(MetadataEvent::Thread {
                pointer: 0x300,
                name: None
            })
        );
    }

    #[test]
    fn legacy_monitor_kind_from_exinfo() {
        let mut bytes = vec![TYPE_MONITOR_BT | (1 << 4) | 5];
        uleb(3, &mut bytes);
        sleb(0x40, &mut bytes);
        uleb(0, &mut bytes); // backtrace flags
        uleb(2, &mut bytes);
        sleb(10, &mut bytes);
        sleb(-4, &mut bytes);

        let decoded = decode_all(&bytes, FormatRevision::Legacy).unwrap();
        assert_eq!(
            decoded[0].1,
            LogEvent::Monitor(MonitorEvent {
                kind: MonitorEventKind::Contention,
                object: 0x40,
                backtrace: Some(Backtrace {
                    flags: 0,
                    frames: vec![10, -4]
                }),
            })
        );
    }

    #[test]
    fn legacy_sample_hit() {
        let mut bytes = vec![7];
        uleb(1, &mut bytes);
        uleb(123_456, &mut bytes);
        uleb(2, &mut bytes);
        sleb(0x1000, &mut bytes);
        sleb(0x2000, &mut bytes);

        let decoded = decode_all(&bytes, FormatRevision::Legacy).unwrap();
        let (time, LogEvent::Sample(SampleEvent::Hit { timestamp, ips, .. })) = &decoded[0] else {
            panic!("expected a sample hit");
        };
        assert_eq!(*time, 0);
        assert_eq!(*timestamp, Some(123_456));
        assert_eq!(ips, &vec![0x1000, 0x2000]);
    }

    #[test]
    fn current_families_roundtrip_through_writer() {
        let events = vec![
            (
                1,
                LogEvent::Alloc(AllocEvent {
                    class: 0x10,
                    object: 0x20,
                    size: 48,
                    backtrace: Some(Backtrace {
                        flags: 0,
                        frames: vec![1, 2, 3],
                    }),
                }),
            ),
            (
                2,
                LogEvent::Exception(ExceptionEvent::Clause {
                    clause_type: 1,
                    clause_index: 0,
                    method: -5,
                    object: Some(0x80),
                }),
            ),
            (
                3,
                LogEvent::Sample(SampleEvent::Counters {
                    values: vec![
                    CounterValue {
                        index: 1,
                        counter_type: COUNTER_TYPE_DOUBLE,
                        value: CounterData::Double(0.25),
                    },
                    CounterValue {
                        index: 2,
                        counter_type: COUNTER_TYPE_STRING,
                        value: CounterData::String(Some("gen0".to_string())),
                    },
                    CounterValue {
                        index: 3,
                        counter_type: COUNTER_TYPE_LONG,
                        value: CounterData::Int(-42),
                    },
                    ],
                }),
            ),
            (
                4,
                LogEvent::Runtime(RuntimeEvent::JitHelper {
                    buffer_type: JIT_HELPER_SPECIFIC_TRAMPOLINE,
                    address: 0x4000,
                    size: 64,
                    name: Some("generic_trampoline_jit".to_string()),
                }),
            ),
            (
                5,
                LogEvent::Coverage(CoverageEvent::Statement {
                    method_id: 7,
                    offset: 12,
                    counter: 3,
                    line: 40,
                    column: 9,
                }),
            ),
            (6, LogEvent::Meta(MetaEvent::SyncPoint { sync_type: 1 })),
        ];
        let decoded = decode_all(&encoded(&events), FormatRevision::Current).unwrap();
        assert_eq!(decoded, events);
    }

    #[test]
    fn oversized_count_is_rejected() {
        let mut bytes = vec![TYPE_GC_MOVE | 1];
        uleb(0, &mut bytes);
        uleb(1_000_000, &mut bytes);
        let err = decode_all(&bytes, FormatRevision::Current).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidLength {
                what: "element count",
                ..
            }
        ));
    }
}
