//! Turns heap-walk events into [`HeapSnapshot`]s.
//!
//! The builder follows the event stream in order. Class metadata extends a
//! type list that lives as long as the builder. Everything a heap walk emits
//! is staged in a [`HeapShotData`], which is reset at every GC start, and
//! compiled into an indexed snapshot when the walk ends.

use crate::snapshot::{
    HeapSnapshot, ObjectInfo, SnapshotTables, TypeInfo, UNKNOWN_OBJECT, UNKNOWN_OBJECT_CODE,
    UNKNOWN_TYPE,
};
use crate::{HeapShotError, Result};
use heapshot_parse::{
    BufferHeader, HeapEvent, HeapObject, HeapRoot, LogBuffer, LogEvent, MetadataEvent, RootKind,
    TimedEvent,
};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Stock types
// ============================================================================

pub const UNKNOWN_TYPE_CODE: i64 = -1;
pub const STACK_ROOT_CODE: i64 = -2;
pub const FINALIZER_ROOT_CODE: i64 = -3;
pub const HANDLE_ROOT_CODE: i64 = -4;
pub const OTHER_ROOT_CODE: i64 = -5;
pub const MISC_ROOT_CODE: i64 = -6;

/// Root pseudo-objects other than the stack count down from here, below every
/// stock type code.
const FIRST_ROOT_OBJECT_CODE: i64 = MISC_ROOT_CODE - 1;

const STOCK_TYPES: [(i64, &str); 6] = [
    (UNKNOWN_TYPE_CODE, "<Unknown>"),
    (STACK_ROOT_CODE, "<Stack>"),
    (FINALIZER_ROOT_CODE, "<Finalizer>"),
    (HANDLE_ROOT_CODE, "<Handle>"),
    (OTHER_ROOT_CODE, "<Other Root>"),
    (MISC_ROOT_CODE, "<Misc Root>"),
];

/// Objects, references and fields are addressed by `u32` indices.
const MAX_TABLE_LEN: usize = u32::MAX as usize;

fn root_type_code(kind: RootKind) -> i64 {
    match kind {
        RootKind::Stack => STACK_ROOT_CODE,
        RootKind::Finalizer => FINALIZER_ROOT_CODE,
        RootKind::Handle => HANDLE_ROOT_CODE,
        RootKind::Other => OTHER_ROOT_CODE,
        RootKind::Misc => MISC_ROOT_CODE,
    }
}

// ============================================================================
// Staging
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct StagedObject {
    code: i64,
    type_code: i64,
    size: u64,
    refs_index: usize,
    refs_count: usize,
}

/// Raw objects of the heap walk in progress, in arrival order.
///
/// Codes may repeat; duplicates are merged when the snapshot is built.
#[derive(Debug, Default, Clone)]
pub struct HeapShotData {
    objects: Vec<StagedObject>,
    reference_codes: Vec<i64>,
    /// Running field offset of each reference, 0 when unknown.
    field_reference_codes: Vec<u64>,
}

impl HeapShotData {
    pub fn reset(&mut self) {
        self.objects.clear();
        self.reference_codes.clear();
        self.field_reference_codes.clear();
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stage an object with its `(reference code, field code)` pairs.
    pub fn add_object(
        &mut self,
        code: i64,
        type_code: i64,
        size: u64,
        references: impl IntoIterator<Item = (i64, u64)>,
    ) {
        let refs_index = self.reference_codes.len();
        for (reference, field) in references {
            self.reference_codes.push(reference);
            self.field_reference_codes.push(field);
        }
        self.objects.push(StagedObject {
            code,
            type_code,
            size,
            refs_index,
            refs_count: self.reference_codes.len() - refs_index,
        });
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Debug)]
pub struct SnapshotBuilder {
    types: Vec<TypeInfo>,
    field_codes: Vec<u64>,
    field_names: Vec<String>,
    data: HeapShotData,
    next_root_code: i64,
    shot_count: usize,
    discarding: bool,
    types_not_found: HashSet<i64>,
    max_table_len: usize,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            types: Vec::new(),
            field_codes: Vec::new(),
            field_names: Vec::new(),
            data: HeapShotData::default(),
            next_root_code: FIRST_ROOT_OBJECT_CODE,
            shot_count: 0,
            discarding: false,
            types_not_found: HashSet::new(),
            max_table_len: MAX_TABLE_LEN,
        };
        for (code, name) in STOCK_TYPES {
            builder.define_type(code, name);
        }
        builder
    }

    /// Types seen so far, stock types first, in definition order.
    pub fn types(&self) -> &[TypeInfo] {
        &self.types
    }

    /// Number of snapshots built so far.
    pub fn snapshot_count(&self) -> usize {
        self.shot_count
    }

    /// The heap walk being staged.
    pub fn pending(&self) -> &HeapShotData {
        &self.data
    }

    pub fn define_type(&mut self, code: i64, name: impl Into<String>) -> i64 {
        self.define_type_with_fields(code, name, std::iter::empty())
    }

    /// Define a type whose reference slots can be attributed to named fields
    /// by field code.
    pub fn define_type_with_fields(
        &mut self,
        code: i64,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (u64, String)>,
    ) -> i64 {
        let fields_index = self.field_codes.len();
        for (field_code, field_name) in fields {
            self.field_codes.push(field_code);
            self.field_names.push(field_name);
        }
        self.types.push(TypeInfo {
            code,
            name: name.into(),
            fields_index: fields_index as u32,
            fields_count: (self.field_codes.len() - fields_index) as u32,
            object_count: 0,
            total_size: 0,
        });
        code
    }

    /// Drop the partially staged heap walk and ignore heap-walk events until
    /// the next GC start.
    pub fn discard_pending(&mut self) {
        if !self.data.is_empty() {
            tracing::debug!(
                objects = self.data.object_count(),
                "discarding partial heap walk"
            );
        }
        self.data.reset();
        self.discarding = true;
    }

    /// Feed one event. Returns the finished snapshot on a heap walk's end.
    pub fn process(
        &mut self,
        header: &BufferHeader,
        event: &TimedEvent,
    ) -> Result<Option<HeapSnapshot>> {
        match &event.event {
            LogEvent::Gc(gc) if gc.is_start() => {
                self.data.reset();
                self.discarding = false;
            }
            LogEvent::Metadata(MetadataEvent::Class { pointer, name, .. }) => {
                self.define_type(header.pointer(*pointer), name.as_str());
            }
            LogEvent::Heap(_) if self.discarding => {}
            LogEvent::Heap(HeapEvent::Object(object)) => self.add_heap_object(header, object),
            LogEvent::Heap(HeapEvent::Root(root)) => self.add_heap_roots(header, root),
            LogEvent::Heap(HeapEvent::End) => return self.finish_walk(event.time).map(Some),
            _ => {}
        }
        Ok(None)
    }

    /// Feed every event of a buffer, collecting the snapshots it completes.
    pub fn process_buffer(&mut self, buffer: &LogBuffer) -> Result<Vec<HeapSnapshot>> {
        let mut snapshots = Vec::new();
        for event in &buffer.events {
            if let Some(snapshot) = self.process(&buffer.header, event)? {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    fn add_heap_object(&mut self, header: &BufferHeader, object: &HeapObject) {
        let mut field = 0u64;
        self.data.add_object(
            header.object(object.object),
            header.pointer(object.class),
            object.size,
            object.references.iter().map(|reference| {
                field = field.wrapping_add(reference.offset);
                (header.object(reference.object), field)
            }),
        );
    }

    fn add_heap_roots(&mut self, header: &BufferHeader, root: &HeapRoot) {
        for entry in &root.entries {
            let kind = entry.kind();
            let code = match kind {
                RootKind::Stack => STACK_ROOT_CODE,
                _ => {
                    let code = self.next_root_code;
                    self.next_root_code -= 1;
                    code
                }
            };
            let target = header.object(entry.object);
            self.data
                .add_object(code, root_type_code(kind), 0, std::iter::once((target, 0)));
        }
    }

    fn finish_walk(&mut self, timestamp: u64) -> Result<HeapSnapshot> {
        let data = std::mem::take(&mut self.data);
        let snapshot = self.build_from((self.shot_count + 1).to_string(), timestamp, &data);
        self.data = data;
        if snapshot.is_ok() {
            self.shot_count += 1;
        }
        snapshot
    }

    /// Compile staged objects into an indexed snapshot.
    ///
    /// Fails with [`HeapShotError::SnapshotTooLarge`] when the walk has more
    /// objects or references than `u32` indices can address.
    pub fn build_from(
        &mut self,
        name: impl Into<String>,
        timestamp: u64,
        data: &HeapShotData,
    ) -> Result<HeapSnapshot> {
        // The placeholder takes one object slot.
        if data.objects.len() >= self.max_table_len
            || data.reference_codes.len() > self.max_table_len
            || self.field_codes.len() > MAX_TABLE_LEN
            || self.types.len() > MAX_TABLE_LEN
        {
            tracing::warn!(
                objects = data.objects.len(),
                references = data.reference_codes.len(),
                "heap walk exceeds the snapshot index range"
            );
            return Err(HeapShotError::SnapshotTooLarge {
                objects: data.objects.len(),
                references: data.reference_codes.len(),
            });
        }
        // Every `as u32` below is in range after the check above.

        let mut types = self.types.clone();

        // Type indices stay in definition order; a sorted permutation serves lookups.
        let mut type_order: Vec<usize> = (0..types.len()).collect();
        type_order.sort_by_key(|&i| types[i].code);
        let type_codes: Vec<i64> = type_order.iter().map(|&i| types[i].code).collect();

        let mut order: Vec<usize> = (0..data.objects.len()).collect();
        order.sort_by_key(|&i| data.objects[i].code);

        let mut objects = Vec::with_capacity(data.objects.len() + 1);
        let mut object_codes = Vec::with_capacity(data.objects.len() + 1);
        let mut reference_codes = Vec::with_capacity(data.reference_codes.len());
        let mut field_reference_codes = Vec::with_capacity(data.reference_codes.len());
        let mut total_memory = 0u64;

        objects.push(ObjectInfo {
            code: UNKNOWN_OBJECT_CODE,
            type_index: UNKNOWN_TYPE,
            size: 0,
            refs_index: 0,
            refs_count: 0,
            inverse_refs_index: 0,
            inverse_refs_count: 0,
        });
        object_codes.push(UNKNOWN_OBJECT_CODE);

        // Merge duplicates: the first occurrence supplies size and type,
        // references accumulate in arrival order.
        let mut last_code = None;
        for &i in &order {
            let staged = &data.objects[i];
            if last_code != Some(staged.code) {
                last_code = Some(staged.code);
                let type_index = match type_codes.binary_search(&staged.type_code) {
                    Ok(pos) => type_order[pos] as u32,
                    Err(_) => {
                        if self.types_not_found.insert(staged.type_code) {
                            tracing::warn!(type_code = staged.type_code, "type not found");
                        }
                        UNKNOWN_TYPE
                    }
                };
                let info = &mut types[type_index as usize];
                info.object_count += 1;
                info.total_size += staged.size;
                total_memory += staged.size;

                objects.push(ObjectInfo {
                    code: staged.code,
                    type_index,
                    size: staged.size,
                    refs_index: reference_codes.len() as u32,
                    refs_count: 0,
                    inverse_refs_index: 0,
                    inverse_refs_count: 0,
                });
                object_codes.push(staged.code);
            }

            let range = staged.refs_index..staged.refs_index + staged.refs_count;
            reference_codes.extend_from_slice(&data.reference_codes[range.clone()]);
            field_reference_codes.extend_from_slice(&data.field_reference_codes[range]);
            let current = objects.len() - 1;
            objects[current].refs_count += staged.refs_count as u32;
        }

        // Resolve reference codes to indices. Dangling ones point at the placeholder.
        let mut missing_references = 0;
        let references: Vec<u32> = reference_codes
            .iter()
            .map(|code| match object_codes.binary_search(code) {
                Ok(index) => index as u32,
                Err(_) => {
                    missing_references += 1;
                    UNKNOWN_OBJECT
                }
            })
            .collect();
        for &target in &references {
            objects[target as usize].inverse_refs_count += 1;
        }
        if missing_references > 0 {
            tracing::debug!(
                missing = missing_references,
                total = references.len(),
                "references to objects outside the heap walk"
            );
        }

        let mut positions = Vec::with_capacity(objects.len());
        let mut next = 0u32;
        for object in objects.iter_mut() {
            object.inverse_refs_index = next;
            positions.push(next);
            next += object.inverse_refs_count;
        }

        let mut inverse_refs = vec![UNKNOWN_OBJECT; references.len()];
        let mut field_references = vec![None; references.len()];
        for (index, object) in objects.iter().enumerate() {
            let info = &types[object.type_index as usize];
            let fields = info.fields_index as usize..(info.fields_index + info.fields_count) as usize;
            let slots = object.refs_index as usize..(object.refs_index + object.refs_count) as usize;
            for slot in slots {
                let target = references[slot] as usize;
                inverse_refs[positions[target] as usize] = index as u32;
                positions[target] += 1;

                let field = field_reference_codes[slot];
                if field != 0 {
                    field_references[slot] = fields
                        .clone()
                        .find(|&k| self.field_codes[k] == field)
                        .map(|k| k as u32);
                }
            }
        }

        let name = name.into();
        tracing::debug!(
            snapshot = %name,
            objects = objects.len() - 1,
            references = references.len(),
            total_memory,
            "built heap snapshot"
        );

        Ok(HeapSnapshot::from_tables(
            name,
            timestamp,
            SnapshotTables {
                objects,
                object_codes,
                references,
                inverse_refs,
                field_references,
                field_names: self.field_names.clone(),
                types: Arc::new(types),
                total_memory,
                missing_references,
            },
        ))
    }

    /// Define a type by name alone, reusing the code of an earlier definition.
    #[cfg(test)]
    pub(crate) fn define_type_named(&mut self, name: &str) -> i64 {
        match self.types.iter().find(|t| t.name == name) {
            Some(existing) => existing.code,
            None => {
                let code = 0x7000_0000 + self.types.len() as i64;
                self.define_type(code, name)
            }
        }
    }
}
