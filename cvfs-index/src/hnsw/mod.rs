//! # Two-Layer Proximity Graph (HNSW-style)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Layer 1 (highway)   every `promotion_stride`-th node        │
//! │                                                              │
//! │      [0] ─────────── [10] ─────────── [20]                   │
//! │       │                │                │                    │
//! ├───────┼────────────────┼────────────────┼────────────────────┤
//! │  Layer 0 (dense)     every node                              │
//! │                                                              │
//! │   [0]─[1]─[2]─ ... ─[10]─[11]─ ... ─[20]─[21]─ ...           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Build
//! Nodes are inserted in order. Node `i` is compared against at most `window`
//! of the nodes inserted just before it and keeps the `m` nearest as its
//! layer-0 adjacency. Promoted nodes are additionally linked to their `m`
//! nearest promoted peers on layer 1.
//!
//! Adjacency lists are sorted ascending by distance to their owner, ties by
//! insertion order. Each list is bounded by `m`; search also walks the reverse
//! direction of every edge, which keeps the layer-0 graph connected (every node
//! after the first links to an earlier one).
//!
//! ## Search
//! Best-first expansion on layer 1 from the first promoted node, then on
//! layer 0 seeded with the layer-1 candidates, keeping the best `ef`. With no
//! promoted node left, layer 0 is entered at the first node.

pub mod graph_file;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, warn};

use cvfs_core::config::HnswConfig;
use cvfs_core::error::{Error, Result};

use crate::distance::squared_l2_unchecked;
use crate::traits::{Candidate, SearchResult, VectorSource};

pub use graph_file::GraphLine;

/// Dense layer
pub const LAYER_BASE: u8 = 0;
/// Sparse layer over promoted nodes
pub const LAYER_HIGHWAY: u8 = 1;

/// Two-layer proximity graph over a snapshot of the store
#[derive(Debug, Clone)]
pub struct HnswIndex {
    config: HnswConfig,
    dimension: usize,
    /// Vector ids in insertion order; position == sequence number
    ids: Vec<String>,
    positions: HashMap<String, usize>,
    vectors: Vec<Vec<f64>>,
    /// Layer-0 adjacency, one list per node
    base: Vec<Vec<usize>>,
    /// Layer-1 adjacency, promoted nodes only
    highway: BTreeMap<usize, Vec<usize>>,
    /// Reverse edges, derived from the two above
    base_back: Vec<Vec<usize>>,
    highway_back: BTreeMap<usize, Vec<usize>>,
}

impl HnswIndex {
    /// Build from `(id, vector)` pairs in insertion order
    pub fn build<I>(records: I, config: &HnswConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        if config.m == 0 || config.window == 0 || config.promotion_stride == 0 {
            return Err(Error::invalid(format!(
                "HNSW parameters must be positive (m={}, window={}, promotion_stride={})",
                config.m, config.window, config.promotion_stride
            )));
        }

        let mut index = Self::empty(config.clone());
        for (id, vector) in records {
            index.push_node(id, vector)?;
        }

        let n = index.ids.len();
        index.base = Vec::with_capacity(n);
        for i in 0..n {
            let start = i.saturating_sub(config.window);
            let neighbors = index.nearest_among(i, start..i);
            index.base.push(neighbors);
        }

        let promoted: Vec<usize> = (0..n).filter(|i| i % config.promotion_stride == 0).collect();
        for &p in &promoted {
            let neighbors = index.nearest_among(p, promoted.iter().copied().filter(|&q| q != p));
            index.highway.insert(p, neighbors);
        }

        index.rebuild_back_links();

        info!(
            "Built HNSW index: {} nodes, {} promoted, m={}, window={}",
            n,
            promoted.len(),
            config.m,
            config.window
        );
        Ok(index)
    }

    fn empty(config: HnswConfig) -> Self {
        Self {
            config,
            dimension: 0,
            ids: Vec::new(),
            positions: HashMap::new(),
            vectors: Vec::new(),
            base: Vec::new(),
            highway: BTreeMap::new(),
            base_back: Vec::new(),
            highway_back: BTreeMap::new(),
        }
    }

    fn push_node(&mut self, id: String, vector: Vec<f64>) -> Result<usize> {
        if self.ids.is_empty() {
            self.dimension = vector.len();
        } else if vector.len() != self.dimension {
            return Err(Error::dimension_mismatch(self.dimension, vector.len()));
        }
        if self.positions.contains_key(&id) {
            return Err(Error::invalid(format!("duplicate vector id in HNSW build: {}", id)));
        }

        let seq = self.ids.len();
        self.positions.insert(id.clone(), seq);
        self.ids.push(id);
        self.vectors.push(vector);
        Ok(seq)
    }

    /// The `m` nearest of `others` to node `owner`, ascending, ties by sequence
    fn nearest_among(&self, owner: usize, others: impl IntoIterator<Item = usize>) -> Vec<usize> {
        let origin = &self.vectors[owner];
        let mut candidates: Vec<Candidate> = others
            .into_iter()
            .map(|j| Candidate::new(squared_l2_unchecked(origin, &self.vectors[j]), j))
            .collect();
        candidates.sort();
        candidates.truncate(self.config.m);
        candidates.into_iter().map(|c| c.seq).collect()
    }

    fn rebuild_back_links(&mut self) {
        let n = self.ids.len();
        self.base_back = vec![Vec::new(); n];
        for (owner, neighbors) in self.base.iter().enumerate() {
            for &nb in neighbors {
                self.base_back[nb].push(owner);
            }
        }

        self.highway_back = self.highway.keys().map(|&p| (p, Vec::new())).collect();
        for (&owner, neighbors) in &self.highway {
            for &nb in neighbors {
                self.highway_back.entry(nb).or_default().push(owner);
            }
        }
    }

    /// Search for the best `ef` candidates, ascending by distance.
    ///
    /// An index without nodes returns an empty result; callers treat that as
    /// the signal to fall back to a linear scan.
    pub fn search(&self, query: &[f64], ef: usize) -> Result<Vec<SearchResult>> {
        if self.ids.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::dimension_mismatch(self.dimension, query.len()));
        }
        let ef = ef.max(1);

        // A reloaded graph can lose every promoted node; layer 0 then starts
        // from the first node.
        let seeds: Vec<usize> = match self.highway.keys().next() {
            Some(&entry) => self
                .search_layer(query, &[entry], ef, LAYER_HIGHWAY)
                .iter()
                .map(|c| c.seq)
                .collect(),
            None => vec![0],
        };
        let hits = self.search_layer(query, &seeds, ef, LAYER_BASE);

        debug!(
            "HNSW search: ef={}, {} layer-0 seeds, {} results",
            ef,
            seeds.len(),
            hits.len()
        );

        Ok(hits
            .into_iter()
            .map(|c| SearchResult::new(self.ids[c.seq].clone(), c.distance))
            .collect())
    }

    /// Top `k` with a candidate list of at least `ef`
    pub fn search_k(&self, query: &[f64], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        let mut results = self.search(query, ef.max(k))?;
        results.truncate(k);
        Ok(results)
    }

    fn search_layer(&self, query: &[f64], entries: &[usize], ef: usize, layer: u8) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        // Min-heap of nodes to expand
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        // Max-heap holding the best `ef` seen so far
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &entry in entries {
            if visited.insert(entry) {
                let c = Candidate::new(squared_l2_unchecked(query, &self.vectors[entry]), entry);
                frontier.push(Reverse(c));
                best.push(c);
                if best.len() > ef {
                    best.pop();
                }
            }
        }

        while let Some(Reverse(current)) = frontier.pop() {
            if best.len() >= ef {
                if let Some(worst) = best.peek() {
                    if current > *worst {
                        break;
                    }
                }
            }

            for nb in self.layer_neighbors(current.seq, layer) {
                if !visited.insert(nb) {
                    continue;
                }
                let c = Candidate::new(squared_l2_unchecked(query, &self.vectors[nb]), nb);
                let admit = best.len() < ef || best.peek().map_or(true, |worst| c < *worst);
                if admit {
                    frontier.push(Reverse(c));
                    best.push(c);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        best.into_sorted_vec()
    }

    fn layer_neighbors(&self, seq: usize, layer: u8) -> impl Iterator<Item = usize> + '_ {
        let (forward, back): (&[usize], &[usize]) = if layer == LAYER_BASE {
            (&self.base[seq], &self.base_back[seq])
        } else {
            (
                self.highway.get(&seq).map(Vec::as_slice).unwrap_or(&[]),
                self.highway_back.get(&seq).map(Vec::as_slice).unwrap_or(&[]),
            )
        };
        forward.iter().chain(back.iter()).copied()
    }

    /// Replace one adjacency list. Neighbors are re-sorted by distance and
    /// truncated to `m`.
    pub fn update_neighbors(&mut self, id: &str, layer: u8, neighbors: &[String]) -> Result<()> {
        let owner = *self.positions.get(id).ok_or_else(|| Error::VectorNotFound { id: id.to_string() })?;
        if layer == LAYER_HIGHWAY && !self.highway.contains_key(&owner) {
            return Err(Error::invalid(format!("{} is not promoted to layer 1", id)));
        }
        if layer > LAYER_HIGHWAY {
            return Err(Error::invalid(format!("unknown HNSW layer {}", layer)));
        }

        let mut seqs = Vec::with_capacity(neighbors.len());
        for nb in neighbors {
            let seq = *self.positions.get(nb.as_str()).ok_or_else(|| Error::VectorNotFound { id: nb.clone() })?;
            if seq != owner && !seqs.contains(&seq) {
                seqs.push(seq);
            }
        }
        let sorted = self.nearest_among(owner, seqs);

        if layer == LAYER_BASE {
            self.base[owner] = sorted;
        } else {
            self.highway.insert(owner, sorted);
        }
        self.rebuild_back_links();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// Number of populated layers: 0 for an empty index, otherwise 2
    pub fn layer_count(&self) -> usize {
        match (self.base.is_empty(), self.highway.is_empty()) {
            (true, _) => 0,
            (false, true) => 1,
            (false, false) => 2,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Ids in insertion order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn promoted_ids(&self) -> Vec<&str> {
        self.highway.keys().map(|&p| self.ids[p].as_str()).collect()
    }

    /// Stored adjacency of `id` on `layer`, nearest first
    pub fn neighbors(&self, id: &str, layer: u8) -> Option<Vec<&str>> {
        let seq = *self.positions.get(id)?;
        let list = if layer == LAYER_BASE {
            self.base.get(seq)?
        } else {
            self.highway.get(&seq)?
        };
        Some(list.iter().map(|&s| self.ids[s].as_str()).collect())
    }

    /// Adjacency lines in graph-file order: every layer-0 line, then layer 1
    pub fn graph_lines(&self) -> Vec<GraphLine> {
        let mut lines = Vec::with_capacity(self.ids.len() + self.highway.len());
        for (seq, neighbors) in self.base.iter().enumerate() {
            lines.push(GraphLine {
                node: self.ids[seq].clone(),
                layer: LAYER_BASE,
                neighbors: neighbors.iter().map(|&s| self.ids[s].clone()).collect(),
            });
        }
        for (&seq, neighbors) in &self.highway {
            lines.push(GraphLine {
                node: self.ids[seq].clone(),
                layer: LAYER_HIGHWAY,
                neighbors: neighbors.iter().map(|&s| self.ids[s].clone()).collect(),
            });
        }
        lines
    }

    /// Write the graph file
    pub fn save(&self, path: &Path) -> Result<()> {
        graph_file::write_lines(path, &self.graph_lines())
    }

    /// Rewrite only the `(id, layer)` line of an existing graph file
    pub fn save_neighbors(&self, path: &Path, id: &str, layer: u8) -> Result<()> {
        let neighbors = self
            .neighbors(id, layer)
            .ok_or_else(|| Error::VectorNotFound { id: id.to_string() })?;
        graph_file::upsert_line(
            path,
            GraphLine {
                node: id.to_string(),
                layer,
                neighbors: neighbors.into_iter().map(str::to_string).collect(),
            },
        )
    }

    /// Rebuild an index from a graph file, resolving vectors through `source`.
    ///
    /// Returns `None` when the file is missing or holds no nodes. Nodes whose
    /// vector can no longer be resolved are dropped together with their edges.
    pub fn load(path: &Path, config: &HnswConfig, source: &dyn VectorSource) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let lines = graph_file::read_lines(path)?;

        let mut index = Self::empty(config.clone());
        for line in lines.iter().filter(|l| l.layer == LAYER_BASE) {
            if index.positions.contains_key(&line.node) {
                continue;
            }
            match source.vector(&line.node) {
                Some(vector) => {
                    index.push_node(line.node.clone(), vector)?;
                }
                None => warn!("Dropping graph node {}: vector no longer stored", line.node),
            }
        }
        if index.is_empty() {
            return Ok(None);
        }

        let resolve = |ids: &[String], positions: &HashMap<String, usize>| -> Vec<usize> {
            ids.iter().filter_map(|id| positions.get(id).copied()).collect()
        };

        index.base = vec![Vec::new(); index.ids.len()];
        for line in &lines {
            let Some(&owner) = index.positions.get(&line.node) else {
                continue;
            };
            let neighbors = resolve(&line.neighbors, &index.positions);
            match line.layer {
                LAYER_BASE => index.base[owner] = neighbors,
                LAYER_HIGHWAY => {
                    index.highway.insert(owner, neighbors);
                }
                other => warn!("Ignoring graph line for {} on unknown layer {}", line.node, other),
            }
        }

        // Dropped nodes can cut a node off from everything inserted before it.
        // Relink those within the window so layer 0 stays connected.
        let mut relinked = 0;
        for i in 1..index.ids.len() {
            if !index.base[i].iter().any(|&j| j < i) {
                let start = i.saturating_sub(config.window);
                index.base[i] = index.nearest_among(i, start..i);
                relinked += 1;
            }
        }
        if relinked > 0 {
            debug!("Relinked {} graph nodes cut off by dropped vectors", relinked);
        }
        index.rebuild_back_links();

        info!("Loaded HNSW graph from {:?}: {} nodes", path, index.len());
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(m: usize, window: usize, stride: usize) -> HnswConfig {
        HnswConfig {
            m,
            window,
            promotion_stride: stride,
            ef_search: 10,
        }
    }

    fn records(points: &[(&str, [f64; 2])]) -> Vec<(String, Vec<f64>)> {
        points.iter().map(|(id, v)| (id.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn test_window_bounds_candidates() {
        // With window=1 each node can only link to its predecessor.
        let pts = records(&[("a", [0.0, 0.0]), ("b", [5.0, 0.0]), ("c", [0.1, 0.0])]);
        let index = HnswIndex::build(pts, &config(4, 1, 10)).unwrap();

        assert_eq!(index.neighbors("a", 0).unwrap(), Vec::<&str>::new());
        assert_eq!(index.neighbors("b", 0).unwrap(), vec!["a"]);
        assert_eq!(index.neighbors("c", 0).unwrap(), vec!["b"]);
    }

    #[test]
    fn test_adjacency_sorted_and_bounded() {
        let pts = records(&[
            ("a", [0.0, 0.0]),
            ("b", [3.0, 0.0]),
            ("c", [1.0, 0.0]),
            ("d", [2.0, 0.0]),
            ("e", [0.5, 0.0]),
        ]);
        let index = HnswIndex::build(pts, &config(2, 100, 10)).unwrap();
        assert_eq!(index.neighbors("e", 0).unwrap(), vec!["a", "c"]);
        for id in index.ids() {
            assert!(index.neighbors(id, 0).unwrap().len() <= 2);
        }
    }

    #[test]
    fn test_promotion_stride() {
        let pts: Vec<(String, Vec<f64>)> = (0..25).map(|i| (format!("v{}", i), vec![i as f64, 0.0])).collect();
        let index = HnswIndex::build(pts, &config(3, 100, 10)).unwrap();
        assert_eq!(index.promoted_ids(), vec!["v0", "v10", "v20"]);
        assert!(index.neighbors("v5", LAYER_HIGHWAY).is_none());
        assert_eq!(index.neighbors("v10", LAYER_HIGHWAY).unwrap(), vec!["v0", "v20"]);
        assert_eq!(index.layer_count(), 2);
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = HnswIndex::build(Vec::new(), &config(2, 10, 10)).unwrap();
        assert_eq!(index.layer_count(), 0);
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = HnswIndex::build(records(&[("a", [0.0, 0.0])]), &config(2, 10, 10)).unwrap();
        assert!(matches!(index.search(&[1.0], 5), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let pts = vec![("a".to_string(), vec![0.0, 0.0]), ("b".to_string(), vec![0.0])];
        assert!(matches!(HnswIndex::build(pts, &config(2, 10, 10)), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_equal_distances_keep_insertion_order() {
        let pts = records(&[("a", [1.0, 0.0]), ("b", [-1.0, 0.0]), ("c", [0.0, 1.0])]);
        let index = HnswIndex::build(pts, &config(2, 10, 10)).unwrap();
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_update_neighbors_resorts() {
        let pts = records(&[("a", [0.0, 0.0]), ("b", [1.0, 0.0]), ("c", [2.0, 0.0])]);
        let mut index = HnswIndex::build(pts, &config(2, 10, 10)).unwrap();
        index
            .update_neighbors("a", LAYER_BASE, &["c".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(index.neighbors("a", LAYER_BASE).unwrap(), vec!["b", "c"]);
        assert!(index.update_neighbors("b", LAYER_HIGHWAY, &[]).is_err());
        assert!(index.update_neighbors("zz", LAYER_BASE, &[]).is_err());
    }
}
