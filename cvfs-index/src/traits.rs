//! # Index Traits
//!
//! Result types shared by every index and the seam through which persisted
//! indexes get their vectors back from the store.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

/// Search result with ID and distance
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub distance: f64,
}

impl SearchResult {
    pub fn new(id: impl Into<String>, distance: f64) -> Self {
        Self { id: id.into(), distance }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({ "id": self.id, "distance": self.distance })
    }
}

/// Heap entry ordered by distance, then by insertion sequence.
///
/// Equal distances resolve to the earlier inserted vector, which keeps every
/// search deterministic.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub distance: f64,
    pub seq: usize,
}

impl Candidate {
    pub fn new(distance: f64, seq: usize) -> Self {
        Self { distance, seq }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Anything that can hand back a vector for an id.
///
/// Index files only persist ids; loading one resolves the vectors through
/// this trait (usually backed by the vector store).
pub trait VectorSource {
    fn vector(&self, id: &str) -> Option<Vec<f64>>;
}

impl VectorSource for HashMap<String, Vec<f64>> {
    fn vector(&self, id: &str) -> Option<Vec<f64>> {
        self.get(id).cloned()
    }
}

impl<F> VectorSource for F
where
    F: Fn(&str) -> Option<Vec<f64>>,
{
    fn vector(&self, id: &str) -> Option<Vec<f64>> {
        self(id)
    }
}
