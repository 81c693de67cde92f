//! The indexed, immutable representation of one heap walk.
//!
//! Objects live in flat tables sorted by code; references are contiguous
//! ranges of a shared `u32` array. A snapshot handle is cheap to clone: the
//! tables sit behind an [`Arc`], and a diff reuses the newer snapshot's
//! tables and only adds a filter mask and its own copy of the type table.
//!
//! Object index 0 is a size-0 `<Unknown>` placeholder. References to
//! objects that were never walked resolve to it. It is not counted in
//! [`HeapSnapshot::num_objects`] and never returned by
//! [`HeapSnapshot::objects_by_type`].

use crate::builder::{MISC_ROOT_CODE, STACK_ROOT_CODE};
use crate::graph::Graph;
use crate::progress::ProgressSink;
use crate::reference::ReferenceNode;
use crate::roots;
use crate::{HeapShotError, Result};
use serde::Serialize;
use std::sync::Arc;

/// Index of the `<Unknown>` type.
pub const UNKNOWN_TYPE: u32 = 0;
/// Index of the placeholder object.
pub const UNKNOWN_OBJECT: u32 = 0;
/// Code of the placeholder object; it sorts before every real code.
pub const UNKNOWN_OBJECT_CODE: i64 = i64::MIN;

/// One object of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub code: i64,
    pub type_index: u32,
    pub size: u64,
    pub refs_index: u32,
    pub refs_count: u32,
    pub inverse_refs_index: u32,
    pub inverse_refs_count: u32,
}

/// One type of a snapshot, with per-snapshot aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeInfo {
    pub code: i64,
    pub name: String,
    pub fields_index: u32,
    pub fields_count: u32,
    pub object_count: u64,
    pub total_size: u64,
}

/// Tables shared by a snapshot and every diff derived from it.
#[derive(Debug)]
pub(crate) struct SnapshotTables {
    pub objects: Vec<ObjectInfo>,
    pub object_codes: Vec<i64>,
    pub references: Vec<u32>,
    pub inverse_refs: Vec<u32>,
    /// Field index per reference slot, when resolvable.
    pub field_references: Vec<Option<u32>>,
    pub field_names: Vec<String>,
    pub types: Arc<Vec<TypeInfo>>,
    pub total_memory: u64,
    pub missing_references: usize,
}

#[derive(Debug)]
struct FilterMask {
    removed: Vec<bool>,
    count: usize,
}

#[derive(Debug, Clone)]
pub struct HeapSnapshot {
    name: String,
    timestamp: u64,
    tables: Arc<SnapshotTables>,
    types: Arc<Vec<TypeInfo>>,
    total_memory: u64,
    filter: Option<Arc<FilterMask>>,
}

/// Lazily walks one object's reference range, skipping filtered targets.
#[derive(Debug, Clone)]
pub struct RefIter<'a> {
    slots: std::slice::Iter<'a, u32>,
    filter: Option<&'a [bool]>,
}

impl Iterator for RefIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let filter = self.filter;
        self.slots
            .by_ref()
            .copied()
            .find(|&obj| !filter.is_some_and(|removed| removed[obj as usize]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.slots.len()))
    }
}

impl HeapSnapshot {
    pub(crate) fn from_tables(name: String, timestamp: u64, tables: SnapshotTables) -> Self {
        let types = Arc::clone(&tables.types);
        let total_memory = tables.total_memory;
        Self {
            name,
            timestamp,
            tables: Arc::new(tables),
            types,
            total_memory,
            filter: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time of the heap walk's end event, in nanoseconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Bytes held by the visible objects.
    pub fn total_memory(&self) -> u64 {
        self.total_memory
    }

    /// Number of visible objects, root pseudo-objects included.
    pub fn num_objects(&self) -> usize {
        self.tables.objects.len().saturating_sub(1) - self.filtered_count()
    }

    /// Number of object slots, including the placeholder and filtered objects.
    pub fn object_slots(&self) -> usize {
        self.tables.objects.len()
    }

    pub fn filtered_count(&self) -> usize {
        self.filter.as_ref().map_or(0, |f| f.count)
    }

    pub fn is_diff(&self) -> bool {
        self.filter.is_some()
    }

    /// References that pointed at objects missing from the heap walk.
    pub fn missing_references(&self) -> usize {
        self.tables.missing_references
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn types(&self) -> &[TypeInfo] {
        &self.types
    }

    pub fn type_info(&self, type_index: u32) -> &TypeInfo {
        &self.types[type_index as usize]
    }

    pub fn type_name(&self, type_index: u32) -> &str {
        &self.types[type_index as usize].name
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.types.iter().map(|t| t.name.as_str())
    }

    /// Linear scan; type tables are small.
    pub fn type_from_name(&self, name: &str) -> Option<u32> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| i as u32)
    }

    pub fn object_count_for_type(&self, type_index: u32) -> u64 {
        self.types[type_index as usize].object_count
    }

    pub fn object_size_for_type(&self, type_index: u32) -> u64 {
        self.types[type_index as usize].total_size
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub fn object(&self, obj: u32) -> &ObjectInfo {
        &self.tables.objects[obj as usize]
    }

    pub fn object_code(&self, obj: u32) -> i64 {
        self.object(obj).code
    }

    pub fn object_type(&self, obj: u32) -> u32 {
        self.object(obj).type_index
    }

    pub fn object_type_name(&self, obj: u32) -> &str {
        self.type_name(self.object_type(obj))
    }

    pub fn object_size(&self, obj: u32) -> u64 {
        self.object(obj).size
    }

    /// Index of the object with the given code.
    pub fn index_of_code(&self, code: i64) -> Option<u32> {
        match self.tables.object_codes.binary_search(&code) {
            Ok(index) if index as u32 != UNKNOWN_OBJECT => Some(index as u32),
            _ => None,
        }
    }

    pub fn is_filtered(&self, obj: u32) -> bool {
        self.filter
            .as_ref()
            .is_some_and(|f| f.removed[obj as usize])
    }

    /// Pseudo-object standing for a GC root.
    pub fn is_root_object(&self, obj: u32) -> bool {
        (MISC_ROOT_CODE..=STACK_ROOT_CODE).contains(&self.type_info(self.object_type(obj)).code)
    }

    /// The runtime uses a class pointer as the code of the pseudo-object
    /// that holds its static fields. The shared stack root also carries its
    /// type's code and is excluded.
    pub fn is_static_object(&self, obj: u32) -> bool {
        !self.is_root_object(obj)
            && self.object_code(obj) == self.type_info(self.object_type(obj)).code
    }

    /// Visible instances of a type. Restartable: every call starts over.
    pub fn objects_by_type(&self, type_index: u32) -> impl Iterator<Item = u32> + '_ {
        self.tables
            .objects
            .iter()
            .enumerate()
            .skip(1)
            .filter(move |(_, o)| o.type_index == type_index)
            .map(|(i, _)| i as u32)
            .filter(move |&i| !self.is_filtered(i))
    }

    /// Objects referenced by `obj`.
    pub fn references(&self, obj: u32) -> RefIter<'_> {
        let o = self.object(obj);
        let start = o.refs_index as usize;
        self.ref_iter(&self.tables.references[start..start + o.refs_count as usize])
    }

    /// Objects that reference `obj`.
    pub fn referencers(&self, obj: u32) -> RefIter<'_> {
        let o = self.object(obj);
        let start = o.inverse_refs_index as usize;
        self.ref_iter(&self.tables.inverse_refs[start..start + o.inverse_refs_count as usize])
    }

    fn ref_iter<'a>(&'a self, slots: &'a [u32]) -> RefIter<'a> {
        RefIter {
            slots: slots.iter(),
            filter: self.filter.as_ref().map(|f| f.removed.as_slice()),
        }
    }

    /// Name of the field of `referencer` that holds `target`, when the log
    /// carried field identity.
    pub fn referencer_field(&self, referencer: u32, target: u32) -> Option<&str> {
        let o = self.object(referencer);
        let start = o.refs_index as usize;
        (start..start + o.refs_count as usize)
            .find(|&slot| self.tables.references[slot] == target)
            .and_then(|slot| self.tables.field_references[slot])
            .map(|field| self.tables.field_names[field as usize].as_str())
    }

    // ------------------------------------------------------------------
    // Diffs
    // ------------------------------------------------------------------

    /// Objects of `newer` that are not in `older`.
    ///
    /// The result shares `newer`'s tables and hides every object whose code
    /// also appears in `older`. Type and memory aggregates are reduced
    /// accordingly. Any filter already on either operand is ignored: a diff
    /// always compares the two underlying heap walks.
    pub fn get_diff(older: &HeapSnapshot, newer: &HeapSnapshot) -> HeapSnapshot {
        let tables = &newer.tables;
        let mut types: Vec<TypeInfo> = tables.types.as_ref().clone();
        let mut removed = vec![false; tables.objects.len()];
        let mut count = 0;
        let mut total_memory = tables.total_memory;

        for &code in older.tables.object_codes.iter().skip(1) {
            let Ok(index) = tables.object_codes.binary_search(&code) else {
                continue;
            };
            if index == UNKNOWN_OBJECT as usize || removed[index] {
                continue;
            }
            removed[index] = true;
            count += 1;

            let o = &tables.objects[index];
            let t = &mut types[o.type_index as usize];
            t.object_count = t.object_count.saturating_sub(1);
            t.total_size = t.total_size.saturating_sub(o.size);
            total_memory = total_memory.saturating_sub(o.size);
        }

        tracing::debug!(
            older = %older.name,
            newer = %newer.name,
            hidden = count,
            "computed snapshot diff"
        );

        HeapSnapshot {
            name: format!("Diff from {} to {}", older.name, newer.name),
            timestamp: newer.timestamp,
            tables: Arc::clone(tables),
            types: Arc::new(types),
            total_memory,
            filter: Some(Arc::new(FilterMask { removed, count })),
        }
    }

    /// Diff of two snapshots in time order, whichever order they are given in.
    pub fn diff(a: &HeapSnapshot, b: &HeapSnapshot) -> HeapSnapshot {
        if a.timestamp <= b.timestamp {
            Self::get_diff(a, b)
        } else {
            Self::get_diff(b, a)
        }
    }

    // ------------------------------------------------------------------
    // Trees
    // ------------------------------------------------------------------

    /// Reference tree rooted at every instance of the named type.
    ///
    /// With `inverse` the children are the types that reference the root
    /// type; otherwise they are the types it references.
    pub fn reference_tree(&self, type_name: &str, inverse: bool) -> Result<ReferenceNode> {
        let type_index = self
            .type_from_name(type_name)
            .ok_or_else(|| HeapShotError::TypeNotFound(type_name.to_string()))?;
        Ok(self.reference_tree_for_type(type_index, inverse))
    }

    pub fn reference_tree_for_type(&self, type_index: u32, inverse: bool) -> ReferenceNode {
        ReferenceNode::for_type(self.clone(), type_index, inverse)
    }

    /// Tree of the shortest reference paths from every instance of the
    /// named type back to a GC root.
    ///
    /// Returns [`HeapShotError::Cancelled`] when the sink asks to stop.
    pub fn root_reference_tree(
        &self,
        type_name: &str,
        progress: &dyn ProgressSink,
    ) -> Result<ReferenceNode> {
        let type_index = self
            .type_from_name(type_name)
            .ok_or_else(|| HeapShotError::TypeNotFound(type_name.to_string()))?;
        let tree = roots::find_root_paths(self, type_index, progress)?;
        Ok(ReferenceNode::for_path_tree(self.clone(), type_index, Arc::new(tree)))
    }

    /// Type-level graph of every reference in the snapshot.
    pub fn create_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for obj in 1..self.tables.objects.len() as u32 {
            if self.is_filtered(obj) {
                continue;
            }
            let source = self.object_type_name(obj);
            graph.add_object(obj, source);
            for target in self.references(obj) {
                if target != UNKNOWN_OBJECT {
                    graph.add_reference(obj, source, target, self.object_type_name(target));
                }
            }
        }
        graph.finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::builder::{HeapShotData, SnapshotBuilder};

    /// Build a snapshot from `(code, type name, size, references)` tuples.
    pub(crate) fn snapshot_of(name: &str, objects: &[(i64, &str, u64, &[i64])]) -> HeapSnapshot {
        snapshot_at(name, 0, objects)
    }

    pub(crate) fn snapshot_at(
        name: &str,
        timestamp: u64,
        objects: &[(i64, &str, u64, &[i64])],
    ) -> HeapSnapshot {
        let mut builder = SnapshotBuilder::new();
        let mut data = HeapShotData::default();
        for &(code, type_name, size, refs) in objects {
            let type_code = builder.define_type_named(type_name);
            data.add_object(code, type_code, size, refs.iter().map(|&r| (r, 0)));
        }
        builder.build_from(name, timestamp, &data).unwrap()
    }

    fn names(s: &HeapSnapshot, objs: impl Iterator<Item = u32>) -> Vec<i64> {
        objs.map(|o| s.object_code(o)).collect()
    }

    #[test]
    fn queries() {
        let s = snapshot_of(
            "1",
            &[
                (300, "B", 8, &[]),
                (100, "A", 16, &[200, 300]),
                (200, "B", 8, &[300]),
            ],
        );
        assert_eq!(s.num_objects(), 3);
        assert_eq!(s.total_memory(), 32);

        let a = s.type_from_name("A").unwrap();
        let b = s.type_from_name("B").unwrap();
        assert_eq!(s.object_count_for_type(b), 2);
        assert_eq!(s.object_size_for_type(b), 16);
        assert_eq!(names(&s, s.objects_by_type(a)), vec![100]);

        let o100 = s.index_of_code(100).unwrap();
        let o300 = s.index_of_code(300).unwrap();
        assert_eq!(names(&s, s.references(o100)), vec![200, 300]);
        assert_eq!(names(&s, s.referencers(o300)), vec![100, 200]);
        assert_eq!(s.object_type_name(o300), "B");
        assert!(s.index_of_code(UNKNOWN_OBJECT_CODE).is_none());
        assert!(s.type_from_name("Missing").is_none());
        assert_eq!(s.referencer_field(o100, o300), None);
    }

    #[test]
    fn diff_filters_objects_of_the_older_snapshot() {
        let s1 = snapshot_of("1", &[(100, "A", 16, &[]), (200, "B", 8, &[100])]);
        let s2 = snapshot_of(
            "2",
            &[
                (100, "A", 16, &[]),
                (200, "B", 8, &[100, 400]),
                (300, "A", 32, &[100]),
                (400, "B", 4, &[]),
            ],
        );
        let diff = HeapSnapshot::get_diff(&s1, &s2);
        assert_eq!(diff.name(), "Diff from 1 to 2");
        assert_eq!(diff.num_objects(), 2);
        assert_eq!(diff.filtered_count(), 2);
        assert_eq!(diff.total_memory(), 36);

        let a = diff.type_from_name("A").unwrap();
        let b = diff.type_from_name("B").unwrap();
        assert_eq!(names(&diff, diff.objects_by_type(a)), vec![300]);
        assert_eq!(names(&diff, diff.objects_by_type(b)), vec![400]);
        assert_eq!(diff.object_count_for_type(a), 1);
        assert_eq!(diff.object_size_for_type(a), 32);

        // filtered targets are skipped in both directions
        let o300 = diff.index_of_code(300).unwrap();
        assert_eq!(diff.references(o300).count(), 0);
        let o400 = diff.index_of_code(400).unwrap();
        assert_eq!(diff.referencers(o400).count(), 0);
    }

    #[test]
    fn diff_does_not_touch_its_operands() {
        let s1 = snapshot_of("1", &[(100, "A", 16, &[200]), (200, "B", 8, &[])]);
        let s2 = snapshot_of("2", &[(100, "A", 16, &[200]), (200, "B", 8, &[]), (300, "B", 8, &[])]);

        let before = |s: &HeapSnapshot| {
            let refs: Vec<Vec<u32>> = (0..s.object_slots() as u32)
                .map(|o| s.references(o).chain(s.referencers(o)).collect())
                .collect();
            (s.num_objects(), s.total_memory(), s.types().to_vec(), refs)
        };
        let s1_before = before(&s1);
        let s2_before = before(&s2);

        let diff = HeapSnapshot::diff(&s2, &s1);
        assert_eq!(diff.num_objects(), 1);

        assert_eq!(before(&s1), s1_before);
        assert_eq!(before(&s2), s2_before);
        assert!(!s1.is_diff());
        assert!(!s2.is_diff());
    }

    #[test]
    fn static_objects_share_their_class_code() {
        let mut builder = SnapshotBuilder::new();
        let class = builder.define_type(0x5000, "Program");
        let mut data = HeapShotData::default();
        data.add_object(0x5000, class, 0, std::iter::empty());
        data.add_object(0x6000, class, 24, std::iter::empty());
        let s = builder.build_from("1", 0, &data).unwrap();

        assert!(s.is_static_object(s.index_of_code(0x5000).unwrap()));
        assert!(!s.is_static_object(s.index_of_code(0x6000).unwrap()));
    }

    #[test]
    fn snapshot_graph() {
        let s = snapshot_of(
            "1",
            &[
                (100, "A", 16, &[300]),
                (200, "A", 16, &[300]),
                (300, "B", 8, &[]),
            ],
        );
        let graph = s.create_graph();
        let a = graph.node("A").unwrap();
        assert_eq!(a.instance_count, 2);
        let edge = graph.edge("A", "B").unwrap();
        assert_eq!(edge.source_count, 2);
        assert_eq!(edge.target_count, 1);
    }
}
