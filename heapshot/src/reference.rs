//! Type-level reference trees.
//!
//! A [`ReferenceNode`] stands for a set of objects of one type. Its children
//! group the objects that set references (forward trees), the objects that
//! reference it (inverse trees), or the next step towards a GC root (root
//! path trees), by type name. Children are computed on first access and
//! cached; a node never collapses again.
//!
//! Counters of a child node:
//!
//! - `ref_count`: distinct (parent object, child object) pairs
//! - `refs_to_parent`, `object_count`: distinct child objects
//! - `total_memory`: summed size of the distinct child objects
//! - `refs_to_root`, `root_memory`: the parent objects' own root counters,
//!   added once per distinct pair (inverse and root path trees only)

use crate::roots::PathTree;
use crate::snapshot::HeapSnapshot;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Which way a tree follows references.
#[derive(Debug, Clone)]
pub enum TreeMode {
    Forward,
    Inverse,
    RootPaths(Arc<PathTree>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldReference {
    pub field_name: String,
    pub ref_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RootRef {
    references: u64,
    memory: u64,
}

/// Objects added to an unexpanded node, in insertion order.
#[derive(Debug, Default)]
struct Members {
    order: Vec<u32>,
    roots: HashMap<u32, RootRef>,
    pairs: HashSet<(u32, u32)>,
}

#[derive(Debug)]
enum NodeState {
    /// Every instance of the node's type; the set is materialized on expansion.
    AllInstances,
    Unexpanded(Members),
    Expanded(Vec<ReferenceNode>),
}

#[derive(Debug)]
pub struct ReferenceNode {
    pub type_name: String,
    pub type_index: u32,
    pub ref_count: u64,
    pub refs_to_parent: u64,
    pub refs_to_root: u64,
    pub root_memory: u64,
    pub total_memory: u64,
    pub object_count: u64,
    field_references: Vec<FieldReference>,
    snapshot: HeapSnapshot,
    mode: TreeMode,
    state: NodeState,
}

impl ReferenceNode {
    fn empty(snapshot: HeapSnapshot, type_index: u32, mode: TreeMode, state: NodeState) -> Self {
        Self {
            type_name: snapshot.type_name(type_index).to_string(),
            type_index,
            ref_count: 0,
            refs_to_parent: 0,
            refs_to_root: 0,
            root_memory: 0,
            total_memory: 0,
            object_count: 0,
            field_references: Vec::new(),
            snapshot,
            mode,
            state,
        }
    }

    /// Tree over every visible instance of a type. The counters come from
    /// the type table; no object is touched until the node is expanded.
    pub(crate) fn for_type(snapshot: HeapSnapshot, type_index: u32, inverse: bool) -> Self {
        let mode = if inverse {
            TreeMode::Inverse
        } else {
            TreeMode::Forward
        };
        let count = snapshot.object_count_for_type(type_index);
        let size = snapshot.object_size_for_type(type_index);
        let mut node = Self::empty(snapshot, type_index, mode, NodeState::AllInstances);
        node.ref_count = count;
        node.object_count = count;
        node.refs_to_root = count;
        node.total_memory = size;
        node.root_memory = size;
        node
    }

    /// Tree over the base objects of a root path search.
    pub(crate) fn for_path_tree(snapshot: HeapSnapshot, type_index: u32, tree: Arc<PathTree>) -> Self {
        let bases: Vec<u32> = tree
            .root_nodes()
            .iter()
            .map(|&node| tree.node_object(node))
            .collect();
        let mut node = Self::empty(
            snapshot,
            type_index,
            TreeMode::RootPaths(tree),
            NodeState::Unexpanded(Members::default()),
        );
        for obj in bases {
            node.add_root_object(obj);
        }
        node
    }

    pub fn snapshot(&self) -> &HeapSnapshot {
        &self.snapshot
    }

    pub fn mode(&self) -> &TreeMode {
        &self.mode
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.state, NodeState::Expanded(_))
    }

    pub fn average_size(&self) -> u64 {
        if self.object_count == 0 {
            0
        } else {
            self.total_memory / self.object_count
        }
    }

    /// Reference counts per referencing field, when the snapshot knows them.
    pub fn field_references(&self) -> &[FieldReference] {
        &self.field_references
    }

    /// Expands the node if needed and reports whether it has any child.
    pub fn has_references(&mut self) -> bool {
        !self.children().is_empty()
    }

    /// Child nodes, sorted by `ref_count` in descending order.
    pub fn children(&mut self) -> &[ReferenceNode] {
        self.children_mut()
    }

    pub fn children_mut(&mut self) -> &mut [ReferenceNode] {
        self.expand();
        match &mut self.state {
            NodeState::Expanded(children) => children,
            _ => &mut [],
        }
    }

    /// Compute and cache the children. Does nothing once expanded.
    pub fn expand(&mut self) {
        let members = match std::mem::replace(&mut self.state, NodeState::Expanded(Vec::new())) {
            NodeState::Expanded(children) => {
                self.state = NodeState::Expanded(children);
                return;
            }
            NodeState::Unexpanded(members) => members,
            NodeState::AllInstances => self.materialize_instances(),
        };

        let snapshot = &self.snapshot;
        let mut children: Vec<ReferenceNode> = Vec::new();
        let mut by_name: HashMap<&str, usize> = HashMap::new();

        let mut add = |parent: u32, obj: u32, root: RootRef, field: Option<&str>| {
            let name = snapshot.object_type_name(obj);
            let index = *by_name.entry(name).or_insert_with(|| {
                children.push(ReferenceNode::empty(
                    snapshot.clone(),
                    snapshot.object_type(obj),
                    self.mode.clone(),
                    NodeState::Unexpanded(Members::default()),
                ));
                children.len() - 1
            });
            children[index].add_reference(Some(parent), obj, root, field);
        };

        for &obj in &members.order {
            let root = members.roots.get(&obj).copied().unwrap_or_default();
            match &self.mode {
                TreeMode::Forward => {
                    for target in snapshot.references(obj) {
                        let field = snapshot.referencer_field(obj, target);
                        add(obj, target, RootRef::default(), field);
                    }
                }
                TreeMode::Inverse => {
                    for referencer in snapshot.referencers(obj) {
                        let field = snapshot.referencer_field(referencer, obj);
                        add(obj, referencer, root, field);
                    }
                }
                TreeMode::RootPaths(tree) => {
                    if let Some(node) = tree.object_node(obj) {
                        for child in tree.child_nodes(node) {
                            add(obj, tree.node_object(child), root, None);
                        }
                    }
                }
            }
        }

        for child in &mut children {
            child.flush();
        }
        children.sort_by(|a, b| b.ref_count.cmp(&a.ref_count));
        self.state = NodeState::Expanded(children);
    }

    /// Replace the type-table counters with ones accumulated object by object.
    fn materialize_instances(&mut self) -> Members {
        self.ref_count = 0;
        self.refs_to_parent = 0;
        self.refs_to_root = 0;
        self.root_memory = 0;
        self.total_memory = 0;
        self.object_count = 0;
        self.state = NodeState::Unexpanded(Members::default());

        let instances: Vec<u32> = self.snapshot.objects_by_type(self.type_index).collect();
        for obj in instances {
            self.add_root_object(obj);
        }
        match std::mem::replace(&mut self.state, NodeState::Expanded(Vec::new())) {
            NodeState::Unexpanded(members) => members,
            _ => Members::default(),
        }
    }

    fn add_root_object(&mut self, obj: u32) {
        let root = RootRef {
            references: 1,
            memory: self.snapshot.object_size(obj),
        };
        self.add_reference(None, obj, root, None);
    }

    fn add_reference(&mut self, parent: Option<u32>, obj: u32, root: RootRef, field: Option<&str>) {
        let NodeState::Unexpanded(members) = &mut self.state else {
            return;
        };

        let new_pair = parent.is_none_or(|parent| members.pairs.insert((parent, obj)));
        if new_pair {
            self.ref_count += 1;
            self.refs_to_root += root.references;
            self.root_memory += root.memory;
        }

        if let Some(field) = field {
            match self
                .field_references
                .iter_mut()
                .find(|f| f.field_name == field)
            {
                Some(f) => f.ref_count += 1,
                None => self.field_references.push(FieldReference {
                    field_name: field.to_string(),
                    ref_count: 1,
                }),
            }
        }

        match members.roots.entry(obj) {
            Entry::Occupied(mut entry) => {
                if new_pair {
                    let existing = entry.get_mut();
                    existing.references += root.references;
                    existing.memory += root.memory;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(root);
                members.order.push(obj);
                if parent.is_some() {
                    self.refs_to_parent += 1;
                }
                self.object_count += 1;
                self.total_memory += self.snapshot.object_size(obj);
            }
        }
    }

    /// Drop the pair bookkeeping once the parent has finished adding.
    fn flush(&mut self) {
        if let NodeState::Unexpanded(members) = &mut self.state {
            members.pairs = HashSet::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::snapshot::tests::snapshot_of;

    fn child<'a>(node: &'a mut ReferenceNode, name: &str) -> &'a mut ReferenceNode {
        node.children_mut()
            .iter_mut()
            .find(|c| c.type_name == name)
            .unwrap()
    }

    /// Three instances of T; one P references two of them; R references P.
    fn sample() -> HeapSnapshot {
        snapshot_of(
            "1",
            &[
                (1, "T", 10, &[]),
                (2, "T", 10, &[]),
                (3, "T", 10, &[]),
                (10, "P", 40, &[1, 2]),
                (20, "R", 8, &[10]),
            ],
        )
    }

    #[test]
    fn inverse_tree_aggregation() {
        let s = sample();
        let mut root = s.reference_tree("T", true).unwrap();
        assert!(!root.is_expanded());
        assert_eq!(root.ref_count, 3);
        assert_eq!(root.total_memory, 30);
        assert_eq!(root.refs_to_parent, 0);

        let p = child(&mut root, "P");
        assert_eq!(p.refs_to_parent, 1);
        assert_eq!(p.object_count, 1);
        assert_eq!(p.ref_count, 2);
        assert_eq!(p.refs_to_root, 2);
        assert_eq!(p.root_memory, 20);
        assert_eq!(p.total_memory, 40);
        assert_eq!(p.average_size(), 40);

        let r = child(p, "R");
        assert_eq!(r.ref_count, 1);
        assert_eq!(r.refs_to_parent, 1);
        // both T instances reach R through the same P
        assert_eq!(r.refs_to_root, 2);
        assert_eq!(r.root_memory, 20);
        assert!(!r.has_references());

        assert!(root.is_expanded());
        assert_eq!(root.ref_count, 3);
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn forward_tree_aggregation() {
        let s = sample();
        let mut root = s.reference_tree("P", false).unwrap();
        let t = child(&mut root, "T");
        assert_eq!(t.ref_count, 2);
        assert_eq!(t.refs_to_parent, 2);
        assert_eq!(t.total_memory, 20);
        assert_eq!(t.refs_to_root, 0);
        assert!(!t.has_references());
    }

    #[test]
    fn children_are_sorted_by_ref_count() {
        let s = snapshot_of(
            "1",
            &[
                (1, "T", 8, &[]),
                (2, "T", 8, &[]),
                (10, "A", 8, &[1]),
                (11, "B", 8, &[1]),
                (12, "B", 8, &[2]),
            ],
        );
        let mut root = s.reference_tree("T", true).unwrap();
        let names: Vec<&str> = root.children().iter().map(|c| c.type_name.as_str()).collect();
        assert_eq!(names, ["B", "A"]);
    }

    #[test]
    fn unknown_type_name_is_an_error() {
        let s = sample();
        assert!(matches!(
            s.reference_tree("Nope", true),
            Err(crate::HeapShotError::TypeNotFound(name)) if name == "Nope"
        ));
    }

    #[test]
    fn field_references_are_tallied() {
        use crate::builder::{HeapShotData, SnapshotBuilder};

        let mut builder = SnapshotBuilder::new();
        let t = builder.define_type(0x100, "T");
        let p = builder.define_type_with_fields(
            0x200,
            "P",
            [(8, "first".to_string()), (16, "second".to_string())],
        );
        let mut data = HeapShotData::default();
        data.add_object(1, t, 8, []);
        data.add_object(2, t, 8, []);
        data.add_object(10, p, 24, [(1, 8), (2, 16)]);
        data.add_object(11, p, 24, [(1, 8)]);
        let s = builder.build_from("1", 0, &data).unwrap();

        let mut root = s.reference_tree("T", true).unwrap();
        let p = child(&mut root, "P");
        let fields: Vec<(&str, u64)> = p
            .field_references()
            .iter()
            .map(|f| (f.field_name.as_str(), f.ref_count))
            .collect();
        assert_eq!(fields, [("first", 2), ("second", 1)]);
    }

    #[test]
    fn root_path_tree() {
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[2]),
                (2, "Holder", 8, &[10, 11]),
                (10, "Target", 8, &[]),
                (11, "Target", 8, &[]),
            ],
        );
        let mut root = s.root_reference_tree("Target", &NoProgress).unwrap();
        assert_eq!(root.ref_count, 2);

        let holder = child(&mut root, "Holder");
        assert_eq!(holder.ref_count, 2);
        assert_eq!(holder.refs_to_parent, 1);
        assert_eq!(holder.refs_to_root, 2);

        let top = child(holder, "Root");
        assert_eq!(top.refs_to_root, 2);
        assert!(!top.has_references());
    }
}
