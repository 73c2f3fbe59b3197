//! Graph file: `<node_id>|<layer>|<comma-separated neighbor ids>`
//!
//! At most one line per `(node_id, layer)`. When a file holds duplicates (hand
//! edits, interrupted rewrites) the later line wins.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use cvfs_core::error::{Error, Result};

use crate::line_file;

const HEADER: &str = "CVFS HNSW graph: node_id|layer|neighbor_ids";

/// One adjacency list as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphLine {
    pub node: String,
    pub layer: u8,
    pub neighbors: Vec<String>,
}

impl GraphLine {
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.node, self.layer, self.neighbors.join(","))
    }

    pub fn parse(line: &str, line_no: usize) -> Result<Self> {
        let corrupted = |reason: &str| Error::CorruptedRecordLine {
            line: line_no,
            reason: reason.to_string(),
        };

        let mut parts = line.splitn(3, '|');
        let node = parts.next().filter(|s| !s.is_empty()).ok_or_else(|| corrupted("missing node id"))?;
        let layer = parts
            .next()
            .ok_or_else(|| corrupted("missing layer"))?
            .trim()
            .parse::<u8>()
            .map_err(|_| corrupted("layer is not a number"))?;
        let neighbors = parts.next().ok_or_else(|| corrupted("missing neighbor list"))?;

        Ok(Self {
            node: node.to_string(),
            layer,
            neighbors: line_file::split_ids(neighbors),
        })
    }
}

/// Replace the whole graph file
pub fn write_lines(path: &Path, lines: &[GraphLine]) -> Result<()> {
    line_file::write_atomic(path, HEADER, lines.iter().map(GraphLine::encode))
}

/// Read every valid line, de-duplicated by `(node, layer)`, in first-seen order.
/// Malformed lines are skipped with a warning.
pub fn read_lines(path: &Path) -> Result<Vec<GraphLine>> {
    let mut lines: Vec<GraphLine> = Vec::new();
    let mut slots: HashMap<(String, u8), usize> = HashMap::new();

    for (line_no, raw) in line_file::read_records(path)? {
        let line = match GraphLine::parse(&raw, line_no) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping graph line in {:?}: {}", path, e);
                continue;
            }
        };
        match slots.get(&(line.node.clone(), line.layer)) {
            Some(&slot) => lines[slot] = line,
            None => {
                slots.insert((line.node.clone(), line.layer), lines.len());
                lines.push(line);
            }
        }
    }
    Ok(lines)
}

/// Rewrite the line for `(node, layer)`, appending it if absent
pub fn upsert_line(path: &Path, line: GraphLine) -> Result<()> {
    let mut lines = if path.exists() { read_lines(path)? } else { Vec::new() };
    match lines
        .iter_mut()
        .find(|l| l.node == line.node && l.layer == line.layer)
    {
        Some(existing) => *existing = line,
        None => lines.push(line),
    }
    write_lines(path, &lines)
}
