//! Shortest reference paths from objects back to GC roots.
//!
//! The search walks incoming references depth-first from every instance of
//! a type (the base objects). Discovered paths are merged into a
//! [`PathTree`]; a later walk that reaches an object already in the tree
//! splices in the paths found before instead of walking them again.
//!
//! Memo tables bound the work: `visited` holds the objects on the current
//! path with their position, so a revisit becomes a pointer back to an
//! ancestor instead of a loop; `reached` holds the objects of the current
//! walk already known to lead to a root; `dead_ends` holds objects proven to
//! lead nowhere and survives across base objects; the tree itself remembers
//! every resolved object. All of them belong to one [`RootSearch`].
//!
//! An object that was walked, left the path and only looped back into it is
//! walked again on its next visit, since its outcome depends on the path.

use crate::graph::Graph;
use crate::progress::ProgressSink;
use crate::snapshot::{HeapSnapshot, RefIter};
use crate::{HeapShotError, Result};
use std::collections::{HashMap, HashSet};

const NIL: u32 = u32::MAX;

// ============================================================================
// Path tree
// ============================================================================

/// Merged root paths, stored as pairs in one flat array.
///
/// An object node is `(object, first_link)`; a link node is
/// `(object_node, next_link)`. The children of an object node are the
/// objects that reference it on the way to a root. Every object has exactly
/// one object node; several links may point at it.
#[derive(Debug, Default, Clone)]
pub struct PathTree {
    nodes: Vec<u32>,
    roots: Vec<u32>,
    object_nodes: HashMap<u32, u32>,
}

/// Iterator over the child object nodes of a path tree node.
#[derive(Debug, Clone)]
pub struct ChildNodes<'a> {
    nodes: &'a [u32],
    link: u32,
}

impl Iterator for ChildNodes<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.link == NIL {
            return None;
        }
        let link = self.link as usize;
        self.link = self.nodes[link + 1];
        Some(self.nodes[link])
    }
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes of the base objects, in search order.
    pub fn root_nodes(&self) -> &[u32] {
        &self.roots
    }

    pub fn child_nodes(&self, node: u32) -> ChildNodes<'_> {
        ChildNodes {
            nodes: &self.nodes,
            link: self.nodes[node as usize + 1],
        }
    }

    pub fn node_object(&self, node: u32) -> u32 {
        self.nodes[node as usize]
    }

    pub fn object_node(&self, obj: u32) -> Option<u32> {
        self.object_nodes.get(&obj).copied()
    }

    /// Number of distinct objects in the tree.
    pub fn object_count(&self) -> usize {
        self.object_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub(crate) fn add_base_object(&mut self, obj: u32) {
        let node = self.push_pair(obj, NIL);
        self.roots.push(node);
        self.object_nodes.insert(obj, node);
    }

    /// Merge a path that starts at a base object already in the tree.
    pub(crate) fn add_path(&mut self, path: &[u32]) {
        let Some((&first, rest)) = path.split_first() else {
            return;
        };
        let Some(mut current) = self.object_node(first) else {
            return;
        };

        for &obj in rest {
            let mut last_link = current;
            let mut link = self.nodes[current as usize + 1];
            while link != NIL {
                if self.node_object(self.nodes[link as usize]) == obj {
                    break;
                }
                last_link = link;
                link = self.nodes[link as usize + 1];
            }
            if link != NIL {
                current = self.nodes[link as usize];
                continue;
            }

            let child = match self.object_node(obj) {
                Some(node) => node,
                None => {
                    let node = self.push_pair(obj, NIL);
                    self.object_nodes.insert(obj, node);
                    node
                }
            };
            let new_link = self.push_pair(child, NIL);
            self.nodes[last_link as usize + 1] = new_link;
            current = child;
        }
    }

    fn push_pair(&mut self, first: u32, second: u32) -> u32 {
        let pos = self.nodes.len() as u32;
        self.nodes.push(first);
        self.nodes.push(second);
        pos
    }

    /// Type-level graph of every path in the tree.
    ///
    /// Root reference counts are tracked per base object, so they count how
    /// many base objects reach a root through each type.
    pub fn create_graph(&self, snapshot: &HeapSnapshot) -> Graph {
        let mut graph = Graph::new();
        let mut on_path = HashSet::new();
        for &root in &self.roots {
            graph.reset_root_reference_tracking();
            let obj = self.node_object(root);
            graph.add_object(obj, snapshot.object_type_name(obj));

            on_path.insert(root);
            let mut stack = vec![(root, self.child_nodes(root))];
            while let Some((node, children)) = stack.last_mut() {
                let node = *node;
                match children.next() {
                    Some(child) if !on_path.contains(&child) => {
                        let source = self.node_object(node);
                        let target = self.node_object(child);
                        graph.add_reference(
                            source,
                            snapshot.object_type_name(source),
                            target,
                            snapshot.object_type_name(target),
                        );
                        on_path.insert(child);
                        stack.push((child, self.child_nodes(child)));
                    }
                    Some(_) => {}
                    None => {
                        on_path.remove(&node);
                        stack.pop();
                    }
                }
            }
        }
        graph.finish()
    }
}

// ============================================================================
// Search
// ============================================================================

/// What walking one object found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Proven to lead to no root.
    DeadEnd,
    /// A root was reached, or known paths were spliced in.
    Root,
    /// Every path leads back to the path position given.
    Ancestor(usize),
}

enum Entry {
    Settled(Reach),
    Entered,
}

struct Frame<'a> {
    object: u32,
    referencers: RefIter<'a>,
    has_referencers: bool,
    reached_root: bool,
    nearest: Option<usize>,
    log_mark: usize,
}

impl<'a> Frame<'a> {
    fn new(snapshot: &'a HeapSnapshot, object: u32, log_mark: usize) -> Self {
        Self {
            object,
            referencers: snapshot.referencers(object),
            has_referencers: false,
            reached_root: false,
            nearest: None,
            log_mark,
        }
    }

    fn absorb(&mut self, reach: Reach) {
        match reach {
            Reach::DeadEnd => {}
            Reach::Root => self.reached_root = true,
            Reach::Ancestor(index) => {
                self.nearest = Some(self.nearest.map_or(index, |n| n.min(index)));
            }
        }
    }
}

/// Root paths found for one base object, keyed by the root they end at.
#[derive(Debug, Default)]
struct RootPaths {
    paths: Vec<Vec<u32>>,
    by_root: HashMap<u32, usize>,
}

impl RootPaths {
    /// Keep the shortest path per root.
    fn register(&mut self, root: u32, path: &[u32]) {
        match self.by_root.get(&root) {
            Some(&index) => {
                if self.paths[index].len() > path.len() {
                    self.paths[index] = path.to_vec();
                }
            }
            None => {
                self.by_root.insert(root, self.paths.len());
                self.paths.push(path.to_vec());
            }
        }
    }

    fn clear(&mut self) {
        self.paths.clear();
        self.by_root.clear();
    }
}

/// One root path query over one snapshot.
pub struct RootSearch<'a> {
    snapshot: &'a HeapSnapshot,
    tree: PathTree,
    path: Vec<u32>,
    /// Position of every object on `path`.
    visited: HashMap<u32, usize>,
    /// Objects with referencers that led to a root during this base walk.
    reached: HashSet<u32>,
    dead_ends: HashSet<u32>,
    base_objects: HashSet<u32>,
    roots: RootPaths,
    /// Objects pushed on the path during the current base object's walk.
    visit_log: Vec<u32>,
}

impl<'a> RootSearch<'a> {
    pub fn new(snapshot: &'a HeapSnapshot) -> Self {
        Self {
            snapshot,
            tree: PathTree::new(),
            path: Vec::new(),
            visited: HashMap::new(),
            reached: HashSet::new(),
            dead_ends: HashSet::new(),
            base_objects: HashSet::new(),
            roots: RootPaths::default(),
            visit_log: Vec::new(),
        }
    }

    /// Objects proven to have no path to a root.
    pub fn dead_ends(&self) -> &HashSet<u32> {
        &self.dead_ends
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Find root paths for every base object, checking for cancellation
    /// before each one.
    pub fn run(mut self, base_objects: &[u32], progress: &dyn ProgressSink) -> Result<PathTree> {
        self.base_objects = base_objects.iter().copied().collect();
        let total = base_objects.len();

        for (done, &base) in base_objects.iter().enumerate() {
            if progress.is_cancelled() {
                tracing::debug!(done, total, "root search cancelled");
                return Err(HeapShotError::Cancelled);
            }
            self.search_base(base);
            progress.report_progress("Looking for roots", (done + 1) as f64 / total as f64);
        }

        tracing::debug!(
            base_objects = total,
            tree_objects = self.tree.object_count(),
            dead_ends = self.dead_ends.len(),
            "root search finished"
        );
        Ok(self.tree)
    }

    fn search_base(&mut self, base: u32) {
        self.find_root(base);

        self.tree.add_base_object(base);
        for path in &self.roots.paths {
            self.tree.add_path(path);
        }
        self.visited.clear();
        self.reached.clear();
        self.roots.clear();
        self.visit_log.clear();
    }

    fn find_root(&mut self, start: u32) {
        let snapshot = self.snapshot;
        let mut stack = match self.enter(start) {
            Entry::Settled(_) => return,
            Entry::Entered => vec![Frame::new(snapshot, start, self.visit_log.len() - 1)],
        };

        while let Some(top) = stack.last_mut() {
            match top.referencers.next() {
                Some(referencer) => {
                    top.has_referencers = true;
                    if self.base_objects.contains(&referencer) {
                        continue;
                    }
                    match self.enter(referencer) {
                        Entry::Settled(reach) => top.absorb(reach),
                        Entry::Entered => {
                            let log_mark = self.visit_log.len() - 1;
                            stack.push(Frame::new(snapshot, referencer, log_mark));
                        }
                    }
                }
                None => {
                    let Some(frame) = stack.pop() else { break };
                    let reach = self.leave(frame);
                    if let Some(parent) = stack.last_mut() {
                        parent.absorb(reach);
                    }
                }
            }
        }
    }

    /// Check an object before walking it. `Entered` means it was pushed on
    /// the path and needs a frame.
    fn enter(&mut self, obj: u32) -> Entry {
        if self.dead_ends.contains(&obj) {
            return Entry::Settled(Reach::DeadEnd);
        }
        if let Some(&index) = self.visited.get(&obj) {
            return Entry::Settled(Reach::Ancestor(index));
        }
        if self.reached.contains(&obj) {
            return Entry::Settled(Reach::Root);
        }

        if let Some(node) = self.tree.object_node(obj) {
            self.splice_tree_paths(node);
            return Entry::Settled(Reach::Root);
        }

        self.visited.insert(obj, self.path.len());
        self.path.push(obj);
        self.visit_log.push(obj);
        Entry::Entered
    }

    fn leave(&mut self, mut frame: Frame<'_>) -> Reach {
        if !frame.has_referencers {
            self.roots.register(frame.object, &self.path);
            frame.reached_root = true;
        } else if frame.reached_root {
            self.reached.insert(frame.object);
        }
        self.visited.remove(&frame.object);
        self.path.pop();

        let depth = self.path.len();
        let dead = !frame.reached_root && frame.nearest.is_none_or(|n| n >= depth);
        if dead {
            // Everything walked below this frame shares its fate.
            for &obj in &self.visit_log[frame.log_mark..] {
                self.dead_ends.insert(obj);
            }
            self.visit_log.truncate(frame.log_mark);
        }

        match (frame.reached_root, frame.nearest) {
            (true, _) => Reach::Root,
            (false, Some(index)) => Reach::Ancestor(index),
            (false, None) => Reach::DeadEnd,
        }
    }

    /// Register every root path already in the tree below `node`, appended
    /// to the current path.
    fn splice_tree_paths(&mut self, node: u32) {
        let tree = &self.tree;
        let mut on_path = HashSet::new();
        let mut stack = vec![(node, tree.child_nodes(node), false)];
        on_path.insert(node);
        self.path.push(tree.node_object(node));

        while let Some((current, children, has_children)) = stack.last_mut() {
            match children.next() {
                Some(child) => {
                    *has_children = true;
                    if on_path.insert(child) {
                        self.path.push(tree.node_object(child));
                        stack.push((child, tree.child_nodes(child), false));
                    }
                }
                None => {
                    let current = *current;
                    if !*has_children {
                        self.roots.register(tree.node_object(current), &self.path);
                    }
                    on_path.remove(&current);
                    self.path.pop();
                    stack.pop();
                }
            }
        }
    }
}

/// Root paths for every visible instance of a type.
pub fn find_root_paths(
    snapshot: &HeapSnapshot,
    type_index: u32,
    progress: &dyn ProgressSink,
) -> Result<PathTree> {
    let base_objects: Vec<u32> = snapshot.objects_by_type(type_index).collect();
    RootSearch::new(snapshot).run(&base_objects, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::progress::tests::RecordingSink;
    use crate::snapshot::tests::snapshot_of;

    fn codes(s: &HeapSnapshot, tree: &PathTree, node: u32) -> Vec<i64> {
        tree.child_nodes(node)
            .map(|n| s.object_code(tree.node_object(n)))
            .collect()
    }

    fn index(s: &HeapSnapshot, code: i64) -> u32 {
        s.index_of_code(code).unwrap()
    }

    #[test]
    fn path_tree_merges_shared_prefixes() {
        let mut tree = PathTree::new();
        tree.add_base_object(1);
        tree.add_path(&[1, 2, 3]);
        tree.add_path(&[1, 2, 4]);
        tree.add_path(&[1, 5]);

        let root = tree.root_nodes()[0];
        let children: Vec<u32> = tree.child_nodes(root).map(|n| tree.node_object(n)).collect();
        assert_eq!(children, [2, 5]);
        let two = tree.object_node(2).unwrap();
        let grandchildren: Vec<u32> = tree.child_nodes(two).map(|n| tree.node_object(n)).collect();
        assert_eq!(grandchildren, [3, 4]);
        assert_eq!(tree.object_count(), 5);

        // a second base object reusing an object node links to it
        tree.add_base_object(6);
        tree.add_path(&[6, 2]);
        let six = tree.object_node(6).unwrap();
        assert_eq!(tree.child_nodes(six).collect::<Vec<_>>(), [two]);
    }

    #[test]
    fn finds_shortest_paths_to_roots() {
        // root(1) -> a(2) -> target(10); root(1) -> b(3) -> c(4) -> target(10)
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[2, 3]),
                (2, "A", 8, &[10]),
                (3, "B", 8, &[4]),
                (4, "C", 8, &[10]),
                (10, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let tree = find_root_paths(&s, target, &NoProgress).unwrap();

        let base = tree.root_nodes()[0];
        assert_eq!(s.object_code(tree.node_object(base)), 10);
        // only the shortest path to root 1 is kept
        assert_eq!(codes(&s, &tree, base), [2]);
        let a = tree.object_node(index(&s, 2)).unwrap();
        assert_eq!(codes(&s, &tree, a), [1]);
        assert!(tree.object_node(index(&s, 4)).is_none());
    }

    #[test]
    fn later_base_objects_reuse_known_paths() {
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[2]),
                (2, "Holder", 8, &[10, 11]),
                (10, "Target", 8, &[]),
                (11, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let sink = RecordingSink::default();
        let tree = find_root_paths(&s, target, &sink).unwrap();

        assert_eq!(tree.root_nodes().len(), 2);
        let holder = tree.object_node(index(&s, 2)).unwrap();
        for &base in tree.root_nodes() {
            assert_eq!(tree.child_nodes(base).collect::<Vec<_>>(), [holder]);
        }
        assert_eq!(codes(&s, &tree, holder), [1]);

        let reports = sink.reports.borrow();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], ("Looking for roots".to_string(), 0.5));
        assert_eq!(reports[1].1, 1.0);
    }

    #[test]
    fn cycles_without_roots_terminate_as_dead_ends() {
        // 2 -> 3 -> 4 -> 2 is a cycle that also points at the target
        let s = snapshot_of(
            "1",
            &[
                (2, "A", 8, &[3, 10]),
                (3, "B", 8, &[4]),
                (4, "C", 8, &[2]),
                (10, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let base = vec![index(&s, 10)];
        let mut search = RootSearch::new(&s);
        search.base_objects = base.iter().copied().collect();
        search.search_base(base[0]);

        for code in [2, 3, 4] {
            assert!(
                search.dead_ends().contains(&index(&s, code)),
                "object {} should be a dead end",
                code
            );
        }
        let tree = find_root_paths(&s, target, &NoProgress).unwrap();
        let root = tree.root_nodes()[0];
        assert_eq!(tree.child_nodes(root).count(), 0);
    }

    #[test]
    fn cycle_entered_from_two_branches_is_a_dead_end() {
        // 2 -> 5 -> {3, 4} -> 2 is a cycle entered through both 3 and 4
        let s = snapshot_of(
            "1",
            &[
                (2, "A", 8, &[5, 10]),
                (3, "B", 8, &[2]),
                (4, "C", 8, &[2]),
                (5, "D", 8, &[3, 4]),
                (10, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let base = vec![index(&s, 10)];
        let mut search = RootSearch::new(&s);
        search.base_objects = base.iter().copied().collect();
        search.find_root(base[0]);

        assert!(search.roots.paths.is_empty());
        assert!(search.path.is_empty());
        assert!(search.visited.is_empty());
        for code in [2, 3, 4, 5] {
            assert!(
                search.dead_ends().contains(&index(&s, code)),
                "object {} should be a dead end",
                code
            );
        }

        let tree = find_root_paths(&s, target, &NoProgress).unwrap();
        let root = tree.root_nodes()[0];
        assert_eq!(tree.child_nodes(root).count(), 0);
        assert_eq!(tree.object_count(), 1);
    }

    #[test]
    fn shared_referencer_on_a_root_path_is_not_a_dead_end() {
        // root(1) -> 4 -> {2, 3} -> target(10)
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[4]),
                (2, "A", 8, &[10]),
                (3, "B", 8, &[10]),
                (4, "C", 8, &[2, 3]),
                (10, "Target", 8, &[]),
            ],
        );
        let base = vec![index(&s, 10)];
        let mut search = RootSearch::new(&s);
        search.base_objects = base.iter().copied().collect();
        search.find_root(base[0]);

        assert!(search.dead_ends().is_empty());
        assert!(search.reached.contains(&index(&s, 4)));
        let root = index(&s, 1);
        let paths: Vec<Vec<i64>> = search
            .roots
            .paths
            .iter()
            .map(|p| p.iter().map(|&o| s.object_code(o)).collect())
            .collect();
        assert_eq!(paths, [vec![10, 2, 4, 1]]);
        assert_eq!(search.roots.by_root.keys().copied().collect::<Vec<_>>(), [root]);
    }

    #[test]
    fn cycle_with_an_exit_reaches_the_root() {
        // 1 is a root; 2 <-> 3 form a cycle that 1 points into
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[3]),
                (2, "A", 8, &[3, 10]),
                (3, "B", 8, &[2]),
                (10, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let tree = find_root_paths(&s, target, &NoProgress).unwrap();
        let b = tree.object_node(index(&s, 3)).unwrap();
        assert_eq!(codes(&s, &tree, b), [1]);
    }

    #[test]
    fn cancellation_is_checked_per_base_object() {
        let s = snapshot_of(
            "1",
            &[(10, "Target", 8, &[]), (11, "Target", 8, &[]), (12, "Target", 8, &[])],
        );
        let target = s.type_from_name("Target").unwrap();
        let sink = RecordingSink {
            cancel_after: Some(1),
            ..Default::default()
        };
        let result = find_root_paths(&s, target, &sink);
        assert!(matches!(result, Err(HeapShotError::Cancelled)));
        assert_eq!(sink.reports.borrow().len(), 1);
    }

    #[test]
    fn path_tree_graph() {
        let s = snapshot_of(
            "1",
            &[
                (1, "Root", 8, &[2]),
                (2, "Holder", 8, &[10, 11]),
                (10, "Target", 8, &[]),
                (11, "Target", 8, &[]),
            ],
        );
        let target = s.type_from_name("Target").unwrap();
        let tree = find_root_paths(&s, target, &NoProgress).unwrap();
        let graph = tree.create_graph(&s);

        assert_eq!(graph.node("Target").unwrap().instance_count, 2);
        let edge = graph.edge("Target", "Holder").unwrap();
        assert_eq!(edge.source_count, 2);
        assert_eq!(edge.target_count, 1);
        assert_eq!(edge.root_ref_count, 2);
        assert_eq!(graph.node("Root").unwrap().root_ref_count, 2);
    }
}
