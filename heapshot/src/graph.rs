//! Type-level reference graphs.
//!
//! A [`Graph`] collapses an object graph into one node per type name. Node
//! counts are distinct objects; edge counts are distinct source and target
//! objects. "Root reference" counts are tallied at most once per edge and
//! per target node between two calls to
//! [`Graph::reset_root_reference_tracking`], so a graph built from root paths
//! counts how many base objects route through each type.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub name: String,
    pub instance_count: u64,
    pub root_ref_count: u64,
    pub label: String,
    #[serde(skip)]
    pub in_edges: Vec<usize>,
    #[serde(skip)]
    pub out_edges: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: usize,
    pub target: usize,
    pub source_count: u64,
    pub target_count: u64,
    pub root_ref_count: u64,
}

#[derive(Debug, Default)]
struct EdgeScratch {
    sources: HashSet<u32>,
    targets: HashSet<u32>,
}

#[derive(Debug, Default, Serialize)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(skip)]
    node_index: HashMap<String, usize>,
    #[serde(skip)]
    edge_index: HashMap<(usize, usize), usize>,
    #[serde(skip)]
    added: HashSet<u32>,
    #[serde(skip)]
    scratch: Vec<EdgeScratch>,
    #[serde(skip)]
    visited_edges: HashSet<usize>,
    #[serde(skip)]
    visited_nodes: HashSet<usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.node_index.get(name).map(|&i| &self.nodes[i])
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&GraphEdge> {
        let source = *self.node_index.get(source)?;
        let target = *self.node_index.get(target)?;
        self.edge_index
            .get(&(source, target))
            .map(|&i| &self.edges[i])
    }

    /// Count an object under its type's node. Repeated objects are ignored.
    pub fn add_object(&mut self, obj: u32, type_name: &str) -> usize {
        let node = self.node_for(type_name);
        if self.added.insert(obj) {
            self.nodes[node].instance_count += 1;
        }
        node
    }

    /// Record a reference from `source` to `target`, adding both objects.
    pub fn add_reference(&mut self, source: u32, source_type: &str, target: u32, target_type: &str) {
        let snode = self.add_object(source, source_type);
        let tnode = self.add_object(target, target_type);

        let edge = match self.edge_index.get(&(snode, tnode)) {
            Some(&edge) => edge,
            None => {
                let edge = self.edges.len();
                self.edges.push(GraphEdge {
                    source: snode,
                    target: tnode,
                    source_count: 0,
                    target_count: 0,
                    root_ref_count: 0,
                });
                self.scratch.push(EdgeScratch::default());
                self.edge_index.insert((snode, tnode), edge);
                self.nodes[snode].out_edges.push(edge);
                self.nodes[tnode].in_edges.push(edge);
                edge
            }
        };

        let scratch = &mut self.scratch[edge];
        if scratch.sources.insert(source) {
            self.edges[edge].source_count += 1;
        }
        if scratch.targets.insert(target) {
            self.edges[edge].target_count += 1;
        }
        if self.visited_edges.insert(edge) {
            self.edges[edge].root_ref_count += 1;
        }
        if self.visited_nodes.insert(tnode) {
            self.nodes[tnode].root_ref_count += 1;
        }
    }

    pub fn reset_root_reference_tracking(&mut self) {
        self.visited_edges.clear();
        self.visited_nodes.clear();
    }

    /// Compute labels and drop the per-object bookkeeping.
    pub fn finish(mut self) -> Self {
        for node in &mut self.nodes {
            node.label = format!(
                "{}\\n(c:{} rr:{})",
                node.name, node.instance_count, node.root_ref_count
            );
        }
        self.added = HashSet::new();
        self.scratch = Vec::new();
        self.reset_root_reference_tracking();
        self
    }

    /// Write the graph in Graphviz DOT syntax.
    ///
    /// Nodes nothing else points at are drawn light blue; nodes that point at
    /// nothing else are drawn light grey.
    pub fn write_dot<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "digraph ClassGraph {{")?;
        writeln!(out, "\tnode [shape=box];")?;
        for (index, node) in self.nodes.iter().enumerate() {
            let referenced = node
                .in_edges
                .iter()
                .any(|&e| self.edges[e].source != index);
            let references = node
                .out_edges
                .iter()
                .any(|&e| self.edges[e].target != index);
            let style = match (referenced, references) {
                (false, _) => ",style=\"filled\",color=\"lightblue\"",
                (true, false) => ",style=\"filled\",color=\"lightgrey\"",
                (true, true) => "",
            };
            writeln!(out, "\t\"{}\" [label=\"{}\"{}]", node.name, node.label, style)?;
            for &e in &node.out_edges {
                let edge = &self.edges[e];
                writeln!(
                    out,
                    "\t\"{}\" -> \"{}\" [headlabel=\"{}\",taillabel=\"{}\",label=\"rr:{}\"]",
                    self.nodes[edge.target].name,
                    node.name,
                    edge.source_count,
                    edge.target_count,
                    edge.root_ref_count
                )?;
            }
        }
        writeln!(out, "}}")
    }

    fn node_for(&mut self, name: &str) -> usize {
        if let Some(&node) = self.node_index.get(name) {
            return node;
        }
        let node = self.nodes.len();
        self.nodes.push(GraphNode {
            name: name.to_string(),
            instance_count: 0,
            root_ref_count: 0,
            label: String::new(),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
        });
        self.node_index.insert(name.to_string(), node);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_objects() {
        let mut graph = Graph::new();
        graph.add_reference(1, "A", 10, "B");
        graph.add_reference(2, "A", 10, "B");
        graph.add_reference(2, "A", 11, "B");
        graph.add_object(3, "A");
        graph.add_object(3, "A");
        let graph = graph.finish();

        let a = graph.node("A").unwrap();
        assert_eq!(a.instance_count, 3);
        assert_eq!(a.label, "A\\n(c:3 rr:0)");
        let edge = graph.edge("A", "B").unwrap();
        assert_eq!(edge.source_count, 2);
        assert_eq!(edge.target_count, 2);
        assert_eq!(edge.root_ref_count, 1);
        assert_eq!(graph.node("B").unwrap().root_ref_count, 1);
        assert!(graph.edge("B", "A").is_none());
    }

    #[test]
    fn root_references_count_once_per_tracking_round() {
        let mut graph = Graph::new();
        for base in 0..3 {
            graph.reset_root_reference_tracking();
            graph.add_reference(base, "Item", 100, "List");
            graph.add_reference(base, "Item", 100, "List");
        }
        let graph = graph.finish();
        assert_eq!(graph.edge("Item", "List").unwrap().root_ref_count, 3);
        assert_eq!(graph.node("List").unwrap().label, "List\\n(c:1 rr:3)");
    }

    #[test]
    fn dot_output() {
        let mut graph = Graph::new();
        graph.add_reference(1, "A", 2, "B");
        let graph = graph.finish();

        let mut out = Vec::new();
        graph.write_dot(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.starts_with("digraph ClassGraph {\n"));
        assert!(dot.contains("\"A\" [label=\"A\\n(c:1 rr:0)\",style=\"filled\",color=\"lightblue\"]"));
        assert!(dot.contains("\"B\" [label=\"B\\n(c:1 rr:1)\",style=\"filled\",color=\"lightgrey\"]"));
        assert!(dot.contains("\"B\" -> \"A\" [headlabel=\"1\",taillabel=\"1\",label=\"rr:1\"]"));
        assert!(dot.ends_with("}\n"));
    }
}
