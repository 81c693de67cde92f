//! Reports over snapshots: NDJSON for tools, plain text for people.
//!
//! NDJSON output starts with a `header` record, followed by one record per
//! line, each tagged with a `type` field.

use crate::reference::ReferenceNode;
use crate::snapshot::HeapSnapshot;
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

const REPORT_VERSION: &str = "0.1";

// ============================================================================
// Summaries
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub name: String,
    pub timestamp: u64,
    pub num_objects: usize,
    pub total_memory: u64,
    pub type_count: usize,
    pub missing_references: usize,
}

impl SnapshotSummary {
    pub fn new(snapshot: &HeapSnapshot) -> Self {
        Self {
            name: snapshot.name().to_string(),
            timestamp: snapshot.timestamp(),
            num_objects: snapshot.num_objects(),
            total_memory: snapshot.total_memory(),
            type_count: snapshot.type_count(),
            missing_references: snapshot.missing_references(),
        }
    }
}

/// Instances and memory of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeRow {
    pub name: String,
    pub count: u64,
    pub total_size: u64,
    pub average_size: u64,
}

/// Types with at least one instance, largest total size first.
pub fn type_rows(snapshot: &HeapSnapshot) -> Vec<TypeRow> {
    let mut rows: Vec<TypeRow> = snapshot
        .types()
        .iter()
        .filter(|t| t.object_count > 0)
        .map(|t| TypeRow {
            name: t.name.clone(),
            count: t.object_count,
            total_size: t.total_size,
            average_size: t.total_size / t.object_count,
        })
        .collect();
    rows.sort_by(|a, b| b.total_size.cmp(&a.total_size).then(b.count.cmp(&a.count)));
    rows
}

pub fn write_summary_ndjson<W: Write>(snapshot: &HeapSnapshot, mut writer: W) -> Result<()> {
    let header = serde_json::json!({
        "type": "header",
        "format": "heapshot-summary",
        "version": REPORT_VERSION,
        "snapshot": SnapshotSummary::new(snapshot)
    });
    writeln!(writer, "{}", serde_json::to_string(&header)?)?;

    for row in type_rows(snapshot) {
        let record = serde_json::json!({
            "type": "type",
            "name": row.name,
            "count": row.count,
            "total_size": row.total_size,
            "average_size": row.average_size
        });
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
    }

    Ok(())
}

/// `count size name` per type, in type table order, then the total count.
pub fn write_summary_text<W: Write>(snapshot: &HeapSnapshot, mut writer: W) -> Result<()> {
    let mut total = 0;
    for t in snapshot.types() {
        writeln!(writer, "{} {} {}", t.object_count, t.total_size, t.name)?;
        total += t.object_count;
    }
    writeln!(writer)?;
    writeln!(writer, "Total: {}", total)?;
    Ok(())
}

// ============================================================================
// Growth between two snapshots
// ============================================================================

/// Growth info for a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeGrowth {
    pub name: String,
    pub count_before: u64,
    pub count_after: u64,
    pub count_delta: i64,
    pub size_before: u64,
    pub size_after: u64,
    pub size_delta: i64,
    /// Instances of the newer snapshot whose address is not in the older one.
    pub new_objects: u64,
    pub new_size: u64,
}

#[derive(Debug, Clone)]
pub struct HeapGrowth {
    pub older: SnapshotSummary,
    pub newer: SnapshotSummary,
    pub type_growth: Vec<TypeGrowth>,
}

impl HeapGrowth {
    /// Per-type growth from the older to the newer snapshot, whichever order
    /// they are given in, for types that grew in count, size or new
    /// instances. Largest size growth first.
    pub fn compute(a: &HeapSnapshot, b: &HeapSnapshot) -> Self {
        let (older, newer) = if a.timestamp() <= b.timestamp() {
            (a, b)
        } else {
            (b, a)
        };
        let diff = HeapSnapshot::get_diff(older, newer);

        let mut before: HashMap<&str, (u64, u64)> = HashMap::new();
        for t in older.types() {
            let entry = before.entry(t.name.as_str()).or_default();
            entry.0 += t.object_count;
            entry.1 += t.total_size;
        }

        let mut type_growth: Vec<TypeGrowth> = Vec::new();
        for (index, t) in newer.types().iter().enumerate() {
            let (count_before, size_before) = before.remove(t.name.as_str()).unwrap_or_default();
            let new = diff.type_info(index as u32);
            let growth = TypeGrowth {
                name: t.name.clone(),
                count_before,
                count_after: t.object_count,
                count_delta: t.object_count as i64 - count_before as i64,
                size_before,
                size_after: t.total_size,
                size_delta: t.total_size as i64 - size_before as i64,
                new_objects: new.object_count,
                new_size: new.total_size,
            };
            if growth.count_delta > 0 || growth.size_delta > 0 || growth.new_objects > 0 {
                type_growth.push(growth);
            }
        }

        type_growth.sort_by(|a, b| {
            b.size_delta
                .cmp(&a.size_delta)
                .then(b.new_size.cmp(&a.new_size))
        });

        Self {
            older: SnapshotSummary::new(older),
            newer: SnapshotSummary::new(newer),
            type_growth,
        }
    }

    pub fn write_ndjson<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = serde_json::json!({
            "type": "header",
            "format": "heapshot-growth",
            "version": REPORT_VERSION,
            "older": self.older,
            "newer": self.newer
        });
        writeln!(writer, "{}", serde_json::to_string(&header)?)?;

        for growth in &self.type_growth {
            let record = serde_json::json!({
                "type": "growth",
                "name": growth.name,
                "count_before": growth.count_before,
                "count_after": growth.count_after,
                "count_delta": growth.count_delta,
                "size_before": growth.size_before,
                "size_after": growth.size_after,
                "size_delta": growth.size_delta,
                "new_objects": growth.new_objects,
                "new_size": growth.new_size
            });
            writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        }

        Ok(())
    }
}

// ============================================================================
// Reference trees
// ============================================================================

/// Print a reference tree down to `max_levels` below the node.
///
/// Each line is the node's reference count and type name, indented three
/// spaces per level. Field counts, when known, follow on their own line.
pub fn write_tree<W: Write>(writer: &mut W, node: &mut ReferenceNode, max_levels: usize) -> Result<()> {
    write_tree_level(writer, node, 0, max_levels)
}

fn write_tree_level<W: Write>(
    writer: &mut W,
    node: &mut ReferenceNode,
    level: usize,
    max_levels: usize,
) -> Result<()> {
    let indent = " ".repeat(level * 3);
    let count = node.ref_count.to_string();
    writeln!(writer, "{}{} {}", indent, count, node.type_name)?;

    if !node.field_references().is_empty() {
        let fields: Vec<String> = node
            .field_references()
            .iter()
            .map(|f| format!("{}:{}", f.field_name, f.ref_count))
            .collect();
        writeln!(
            writer,
            "{}{} ({})",
            indent,
            " ".repeat(count.len()),
            fields.join(", ")
        )?;
    }

    if level < max_levels {
        for child in node.children_mut() {
            write_tree_level(writer, child, level + 1, max_levels)?;
        }
    }
    Ok(())
}

/// One `node` record per tree node, depth first, down to `max_levels`.
pub fn write_tree_ndjson<W: Write>(
    writer: &mut W,
    node: &mut ReferenceNode,
    inverse: bool,
    max_levels: usize,
) -> Result<()> {
    let header = serde_json::json!({
        "type": "header",
        "format": "heapshot-tree",
        "version": REPORT_VERSION,
        "snapshot": node.snapshot().name(),
        "root": node.type_name,
        "inverse": inverse
    });
    writeln!(writer, "{}", serde_json::to_string(&header)?)?;
    write_tree_records(writer, node, &mut Vec::new(), max_levels)
}

fn write_tree_records<W: Write>(
    writer: &mut W,
    node: &mut ReferenceNode,
    path: &mut Vec<String>,
    max_levels: usize,
) -> Result<()> {
    path.push(node.type_name.clone());
    let record = serde_json::json!({
        "type": "node",
        "depth": path.len() - 1,
        "path": path,
        "ref_count": node.ref_count,
        "refs_to_parent": node.refs_to_parent,
        "refs_to_root": node.refs_to_root,
        "object_count": node.object_count,
        "total_memory": node.total_memory,
        "root_memory": node.root_memory,
        "average_size": node.average_size(),
        "fields": node.field_references()
    });
    writeln!(writer, "{}", serde_json::to_string(&record)?)?;

    if path.len() <= max_levels {
        for child in node.children_mut() {
            write_tree_records(writer, child, path, max_levels)?;
        }
    }
    path.pop();
    Ok(())
}
