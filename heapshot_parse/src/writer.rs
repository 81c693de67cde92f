//! Encoder for the log format.
//!
//! The writer always produces the current event layouts. It exists so tools
//! and tests can synthesize logs without a profiled process.
//!
//! # Example
//!
//! ```
//! use heapshot_parse::{BufferWriter, HeapEvent, LogEvent, LogHeader, LogWriter};
//!
//! let header = LogHeader {
//!     major: 3,
//!     minor: 0,
//!     format: 13,
//!     ptr_size: 8,
//!     startup_time: 0,
//!     timer_overhead: 0,
//!     flags: 0,
//!     pid: 1,
//!     port: 0,
//!     args: Some(String::new()),
//!     arch: Some("x86-64".to_string()),
//!     os: Some("linux".to_string()),
//! };
//!
//! let mut buffer = BufferWriter::new();
//! buffer.push(0, &LogEvent::Heap(HeapEvent::Start));
//! buffer.push(10, &LogEvent::Heap(HeapEvent::End));
//!
//! let mut writer = LogWriter::new(Vec::new());
//! writer.write_header(&header).unwrap();
//! writer.write_buffer(&buffer).unwrap();
//! let bytes = writer.into_inner();
//! assert!(bytes.len() > 48);
//! ```

use crate::event::*;
use crate::header::{BUF_ID, BufferHeader, LOG_HEADER_ID, LogHeader};
use crate::{WriteError, WriteResult};
use std::io::Write;

/// Append the unsigned LEB128 encoding of `value`.
pub fn encode_uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append the signed LEB128 encoding of `value`.
pub fn encode_sleb128(mut value: i64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Writes a file header followed by buffers.
pub struct LogWriter<W: Write> {
    writer: W,
}

impl<W: Write> LogWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write the file header. The three strings are written when the header
    /// declares a current format version.
    pub fn write_header(&mut self, header: &LogHeader) -> WriteResult<()> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&LOG_HEADER_ID.to_le_bytes());
        bytes.extend_from_slice(&[header.major, header.minor, header.format, header.ptr_size]);
        bytes.extend_from_slice(&header.startup_time.to_le_bytes());
        bytes.extend_from_slice(&header.timer_overhead.to_le_bytes());
        bytes.extend_from_slice(&header.flags.to_le_bytes());
        bytes.extend_from_slice(&header.pid.to_le_bytes());
        bytes.extend_from_slice(&header.port.to_le_bytes());

        if header.revision().is_current() {
            for s in [&header.args, &header.arch, &header.os] {
                let s = s.as_deref().unwrap_or("");
                bytes.extend_from_slice(&(s.len() as i32).to_le_bytes());
                bytes.extend_from_slice(s.as_bytes());
            }
        }

        self.writer.write_all(&bytes)?;
        Ok(())
    }

    /// Write a complete buffer: header and payload.
    pub fn write_buffer(&mut self, buffer: &BufferWriter) -> WriteResult<()> {
        self.writer.write_all(&buffer.encode()?)?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Accumulates the events of one buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferWriter {
    pub time_base: u64,
    pub ptr_base: i64,
    pub obj_base: i64,
    pub thread_id: i64,
    pub method_base: i64,
    payload: Vec<u8>,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer with the given bases. The header's length is ignored.
    pub fn with_header(header: &BufferHeader) -> Self {
        Self {
            time_base: header.time_base,
            ptr_base: header.ptr_base,
            obj_base: header.obj_base,
            thread_id: header.thread_id,
            method_base: header.method_base,
            payload: Vec::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Header and payload bytes.
    pub fn encode(&self) -> WriteResult<Vec<u8>> {
        let length =
            i32::try_from(self.payload.len()).map_err(|_| WriteError::BufferTooLarge(self.payload.len()))?;
        let mut bytes = Vec::with_capacity(48 + self.payload.len());
        bytes.extend_from_slice(&BUF_ID.to_le_bytes());
        bytes.extend_from_slice(&length.to_le_bytes());
        bytes.extend_from_slice(&self.time_base.to_le_bytes());
        bytes.extend_from_slice(&self.ptr_base.to_le_bytes());
        bytes.extend_from_slice(&self.obj_base.to_le_bytes());
        bytes.extend_from_slice(&self.thread_id.to_le_bytes());
        bytes.extend_from_slice(&self.method_base.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Append one event with the given time delta.
    pub fn push(&mut self, time_diff: u64, event: &LogEvent) {
        let out = &mut self.payload;
        match event {
            LogEvent::Alloc(alloc) => {
                let bt = if alloc.backtrace.is_some() { TYPE_ALLOC_BT } else { 0 };
                tag(out, EventFamily::Alloc, bt, time_diff);
                encode_sleb128(alloc.class, out);
                encode_sleb128(alloc.object, out);
                encode_uleb128(alloc.size, out);
                write_backtrace(out, alloc.backtrace.as_ref());
            }
            LogEvent::Gc(gc) => write_gc(out, gc, time_diff),
            LogEvent::Metadata(metadata) => write_metadata(out, metadata, time_diff),
            LogEvent::Method(method) => {
                let (subtype, method_ptr) = match method {
                    MethodEvent::Leave { method } => (TYPE_METHOD_LEAVE, *method),
                    MethodEvent::Enter { method } => (TYPE_METHOD_ENTER, *method),
                    MethodEvent::ExceptionLeave { method } => (TYPE_METHOD_EXC_LEAVE, *method),
                    MethodEvent::Jit { method, .. } => (TYPE_METHOD_JIT, *method),
                };
                tag(out, EventFamily::Method, subtype, time_diff);
                encode_sleb128(method_ptr, out);
                if let MethodEvent::Jit {
                    code_address,
                    code_size,
                    name,
                    ..
                } = method
                {
                    encode_sleb128(*code_address, out);
                    encode_uleb128(*code_size, out);
                    write_cstring(out, name);
                }
            }
            LogEvent::Exception(ExceptionEvent::Throw { object, backtrace }) => {
                let bt = if backtrace.is_some() { TYPE_EXCEPTION_BT } else { 0 };
                tag(out, EventFamily::Exception, bt, time_diff);
                encode_sleb128(*object, out);
                write_backtrace(out, backtrace.as_ref());
            }
            LogEvent::Exception(ExceptionEvent::Clause {
                clause_type,
                clause_index,
                method,
                object,
            }) => {
                tag(out, EventFamily::Exception, TYPE_EXCEPTION_CLAUSE, time_diff);
                out.push(*clause_type as u8);
                encode_uleb128(*clause_index, out);
                encode_sleb128(*method, out);
                encode_sleb128(object.unwrap_or(0), out);
            }
            LogEvent::Monitor(monitor) => {
                let bt = if monitor.backtrace.is_some() { TYPE_MONITOR_BT } else { 0 };
                tag(out, EventFamily::Monitor, bt, time_diff);
                out.push(monitor.kind.code());
                encode_sleb128(monitor.object, out);
                write_backtrace(out, monitor.backtrace.as_ref());
            }
            LogEvent::Heap(heap) => write_heap(out, heap, time_diff),
            LogEvent::Sample(sample) => write_sample(out, sample, time_diff),
            LogEvent::Runtime(RuntimeEvent::JitHelper {
                buffer_type,
                address,
                size,
                name,
            }) => {
                tag(out, EventFamily::Runtime, TYPE_JITHELPER, time_diff);
                out.push(*buffer_type);
                encode_sleb128(*address, out);
                encode_uleb128(*size, out);
                if *buffer_type == JIT_HELPER_SPECIFIC_TRAMPOLINE {
                    write_cstring(out, name.as_deref().unwrap_or(""));
                }
            }
            LogEvent::Coverage(coverage) => write_coverage(out, coverage, time_diff),
            LogEvent::Meta(MetaEvent::SyncPoint { sync_type }) => {
                tag(out, EventFamily::Meta, TYPE_SYNC_POINT, time_diff);
                out.push(*sync_type);
            }
        }
    }
}

fn tag(out: &mut Vec<u8>, family: EventFamily, exinfo: u8, time_diff: u64) {
    out.push(exinfo | family as u8);
    encode_uleb128(time_diff, out);
}

fn write_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

fn write_backtrace(out: &mut Vec<u8>, backtrace: Option<&Backtrace>) {
    if let Some(backtrace) = backtrace {
        encode_uleb128(backtrace.frames.len() as u64, out);
        for &frame in &backtrace.frames {
            encode_sleb128(frame, out);
        }
    }
}

fn write_gc(out: &mut Vec<u8>, gc: &GcEvent, time_diff: u64) {
    match gc {
        GcEvent::Event { event, generation } => {
            tag(out, EventFamily::Gc, TYPE_GC_EVENT, time_diff);
            out.push(event.code() as u8);
            out.push(*generation as u8);
        }
        GcEvent::Resize { heap_size } => {
            tag(out, EventFamily::Gc, TYPE_GC_RESIZE, time_diff);
            encode_uleb128(*heap_size, out);
        }
        GcEvent::Move { objects } => {
            tag(out, EventFamily::Gc, TYPE_GC_MOVE, time_diff);
            encode_uleb128(objects.len() as u64, out);
            for &object in objects {
                encode_sleb128(object, out);
            }
        }
        GcEvent::HandleCreated {
            handle_type,
            handle,
            object,
            backtrace,
        } => {
            let subtype = if backtrace.is_some() {
                TYPE_GC_HANDLE_CREATED_BT
            } else {
                TYPE_GC_HANDLE_CREATED
            };
            tag(out, EventFamily::Gc, subtype, time_diff);
            encode_uleb128(*handle_type, out);
            encode_uleb128(*handle, out);
            encode_sleb128(*object, out);
            write_backtrace(out, backtrace.as_ref());
        }
        GcEvent::HandleDestroyed {
            handle_type,
            handle,
            backtrace,
        } => {
            let subtype = if backtrace.is_some() {
                TYPE_GC_HANDLE_DESTROYED_BT
            } else {
                TYPE_GC_HANDLE_DESTROYED
            };
            tag(out, EventFamily::Gc, subtype, time_diff);
            encode_uleb128(*handle_type, out);
            encode_uleb128(*handle, out);
            write_backtrace(out, backtrace.as_ref());
        }
        GcEvent::FinalizeStart => tag(out, EventFamily::Gc, TYPE_GC_FINALIZE_START, time_diff),
        GcEvent::FinalizeEnd => tag(out, EventFamily::Gc, TYPE_GC_FINALIZE_END, time_diff),
        GcEvent::FinalizeObjectStart { object } => {
            tag(out, EventFamily::Gc, TYPE_GC_FINALIZE_OBJECT_START, time_diff);
            encode_sleb128(*object, out);
        }
        GcEvent::FinalizeObjectEnd { object } => {
            tag(out, EventFamily::Gc, TYPE_GC_FINALIZE_OBJECT_END, time_diff);
            encode_sleb128(*object, out);
        }
    }
}

fn write_metadata(out: &mut Vec<u8>, metadata: &MetadataEvent, time_diff: u64) {
    // domain and thread names are only written when exinfo is zero
    let exinfo = match metadata {
        MetadataEvent::Domain { name: None, .. } | MetadataEvent::Thread { name: None, .. } => {
            1 << 4
        }
        _ => 0,
    };
    tag(out, EventFamily::Metadata, exinfo, time_diff);
    let mtype = match metadata.kind() {
        MetadataKind::Class => TYPE_METADATA_CLASS,
        MetadataKind::Image => TYPE_METADATA_IMAGE,
        MetadataKind::Assembly => TYPE_METADATA_ASSEMBLY,
        MetadataKind::Domain => TYPE_METADATA_DOMAIN,
        MetadataKind::Thread => TYPE_METADATA_THREAD,
        MetadataKind::Context => TYPE_METADATA_CONTEXT,
        MetadataKind::VTable => TYPE_METADATA_VTABLE,
    };
    out.push(mtype);
    encode_sleb128(metadata.pointer(), out);

    match metadata {
        MetadataEvent::Class { image, name, .. } => {
            encode_sleb128(*image, out);
            write_cstring(out, name);
        }
        MetadataEvent::Image { name, .. } => write_cstring(out, name),
        MetadataEvent::Assembly { image, name, .. } => {
            encode_sleb128(image.unwrap_or(0), out);
            write_cstring(out, name.as_deref().unwrap_or(""));
        }
        MetadataEvent::Domain { name, .. } | MetadataEvent::Thread { name, .. } => {
            if let Some(name) = name {
                write_cstring(out, name);
            }
        }
        MetadataEvent::Context { domain, .. } => encode_sleb128(*domain, out),
        MetadataEvent::VTable { domain, class, .. } => {
            encode_sleb128(*domain, out);
            encode_sleb128(*class, out);
        }
    }
}

fn write_heap(out: &mut Vec<u8>, heap: &HeapEvent, time_diff: u64) {
    match heap {
        HeapEvent::Start => tag(out, EventFamily::Heap, TYPE_HEAP_START, time_diff),
        HeapEvent::End => tag(out, EventFamily::Heap, TYPE_HEAP_END, time_diff),
        HeapEvent::Object(object) => {
            tag(out, EventFamily::Heap, TYPE_HEAP_OBJECT, time_diff);
            encode_sleb128(object.object, out);
            encode_sleb128(object.class, out);
            encode_uleb128(object.size, out);
            encode_uleb128(object.references.len() as u64, out);
            for reference in &object.references {
                encode_uleb128(reference.offset, out);
                encode_sleb128(reference.object, out);
            }
        }
        HeapEvent::Root(root) => {
            tag(out, EventFamily::Heap, TYPE_HEAP_ROOT, time_diff);
            encode_uleb128(root.entries.len() as u64, out);
            encode_uleb128(root.gc_count, out);
            for entry in &root.entries {
                encode_sleb128(entry.object, out);
                encode_uleb128(entry.root_type, out);
                encode_uleb128(entry.extra, out);
            }
        }
    }
}

fn write_sample(out: &mut Vec<u8>, sample: &SampleEvent, time_diff: u64) {
    match sample {
        SampleEvent::Hit {
            thread,
            ips,
            methods,
            ..
        } => {
            tag(out, EventFamily::Sample, TYPE_SAMPLE_HIT, time_diff);
            encode_sleb128(thread.unwrap_or(0), out);
            encode_uleb128(ips.len() as u64, out);
            for &ip in ips {
                encode_sleb128(ip, out);
            }
            encode_uleb128(methods.len() as u64, out);
            for &method in methods {
                encode_sleb128(method, out);
            }
        }
        SampleEvent::USym {
            address,
            size,
            name,
        } => {
            tag(out, EventFamily::Sample, TYPE_SAMPLE_USYM, time_diff);
            encode_sleb128(*address, out);
            encode_uleb128(*size, out);
            write_cstring(out, name);
        }
        SampleEvent::UBin {
            address,
            offset,
            size,
            name,
        } => {
            tag(out, EventFamily::Sample, TYPE_SAMPLE_UBIN, time_diff);
            encode_sleb128(*address, out);
            encode_uleb128(*offset, out);
            encode_uleb128(*size, out);
            write_cstring(out, name);
        }
        SampleEvent::CountersDesc { counters } => {
            tag(out, EventFamily::Sample, TYPE_SAMPLE_COUNTERS_DESC, time_diff);
            encode_uleb128(counters.len() as u64, out);
            for counter in counters {
                encode_uleb128(counter.section, out);
                if counter.section == PROFILER_COUNTER_SECTION {
                    write_cstring(out, counter.section_name.as_deref().unwrap_or(""));
                }
                write_cstring(out, &counter.name);
                out.extend_from_slice(&[counter.counter_type, counter.unit, counter.variance]);
                encode_uleb128(counter.index, out);
            }
        }
        SampleEvent::Counters { values } => {
            tag(out, EventFamily::Sample, TYPE_SAMPLE_COUNTERS, time_diff);
            for value in values {
                encode_uleb128(value.index, out);
                out.push(value.counter_type);
                match &value.value {
                    CounterData::Int(v) => encode_sleb128(*v, out),
                    CounterData::UInt(v) => encode_uleb128(*v, out),
                    CounterData::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
                    CounterData::String(Some(s)) => {
                        out.push(1);
                        write_cstring(out, s);
                    }
                    CounterData::String(None) => out.push(0),
                }
            }
            encode_uleb128(0, out);
        }
    }
}

fn write_coverage(out: &mut Vec<u8>, coverage: &CoverageEvent, time_diff: u64) {
    match coverage {
        CoverageEvent::Assembly {
            name,
            guid,
            filename,
            methods,
            fully_covered,
            partially_covered,
        } => {
            tag(out, EventFamily::Coverage, TYPE_COVERAGE_ASSEMBLY, time_diff);
            for s in [name, guid, filename] {
                write_cstring(out, s);
            }
            for v in [methods, fully_covered, partially_covered] {
                encode_uleb128(*v, out);
            }
        }
        CoverageEvent::Method {
            assembly,
            class,
            name,
            signature,
            filename,
            token,
            method_id,
            len,
        } => {
            tag(out, EventFamily::Coverage, TYPE_COVERAGE_METHOD, time_diff);
            for s in [assembly, class, name, signature, filename] {
                write_cstring(out, s);
            }
            for v in [token, method_id, len] {
                encode_uleb128(*v, out);
            }
        }
        CoverageEvent::Statement {
            method_id,
            offset,
            counter,
            line,
            column,
        } => {
            tag(out, EventFamily::Coverage, TYPE_COVERAGE_STATEMENT, time_diff);
            for v in [method_id, offset, counter, line, column] {
                encode_uleb128(*v, out);
            }
        }
        CoverageEvent::Class {
            assembly,
            class,
            methods,
            fully_covered,
            partially_covered,
        } => {
            tag(out, EventFamily::Coverage, TYPE_COVERAGE_CLASS, time_diff);
            for s in [assembly, class] {
                write_cstring(out, s);
            }
            for v in [methods, fully_covered, partially_covered] {
                encode_uleb128(*v, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uleb(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_uleb128(value, &mut out);
        out
    }

    fn sleb(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode_sleb128(value, &mut out);
        out
    }

    #[test]
    fn known_encodings() {
        assert_eq!(uleb(0), [0x00]);
        assert_eq!(uleb(127), [0x7f]);
        assert_eq!(uleb(128), [0x80, 0x01]);
        assert_eq!(uleb(624_485), [0xe5, 0x8e, 0x26]);
        assert_eq!(uleb(u64::MAX).len(), 10);

        assert_eq!(sleb(0), [0x00]);
        assert_eq!(sleb(-1), [0x7f]);
        assert_eq!(sleb(63), [0x3f]);
        assert_eq!(sleb(64), [0xc0, 0x00]);
        assert_eq!(sleb(-123_456), [0xc0, 0xbb, 0x78]);
        assert_eq!(sleb(i64::MIN).len(), 10);
    }

    #[test]
    fn buffer_header_layout() {
        let mut buffer = BufferWriter::new();
        buffer.time_base = 7;
        buffer.obj_base = -1;
        buffer.push(3, &LogEvent::Heap(HeapEvent::End));

        let bytes = buffer.encode().unwrap();
        assert_eq!(bytes.len(), 48 + 2);
        assert_eq!(&bytes[0..4], &BUF_ID.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[8..16], &7u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &(-1i64).to_le_bytes());
        assert_eq!(&bytes[48..], &[TYPE_HEAP_END | 6, 3]);
    }
}
