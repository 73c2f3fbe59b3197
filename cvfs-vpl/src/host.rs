//! The seam between the interpreter and the engine that owns the store and
//! indexes. Built-ins never touch files themselves; everything goes through a
//! [`VplHost`].

use cvfs_core::{Result, VectorRecord};
use cvfs_index::SearchResult;

pub trait VplHost {
    /// Look up a stored record
    fn record(&self, id: &str) -> Result<Option<VectorRecord>>;

    /// Every live id, in store order
    fn all_ids(&self) -> Result<Vec<String>>;

    /// Approximate nearest neighbors of `query`, ascending by distance.
    /// Fails with `IndexNotBuilt` when no graph exists yet or it is empty.
    fn hnsw_search(&self, query: &[f64], ef: usize) -> Result<Vec<SearchResult>>;

    /// Exact nearest neighbors of `query` over every durable vector,
    /// ascending by distance
    fn exact_search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>>;

    /// Closest IVF centroid to `query`
    fn ivf_nearest(&self, query: &[f64]) -> Result<SearchResult>;

    /// Member ids of the partition owned by `centroid`
    fn ivf_members(&self, centroid: &str) -> Result<Vec<String>>;

    /// Total approximate distance plus per-subspace codes
    fn pq_distance(&self, codebook: &str, query: &[f64]) -> Result<(f64, Vec<u8>)>;

    /// Append a line to the operation log
    fn record_operation(&self, description: &str);
}
