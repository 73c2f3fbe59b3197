//! # Flat Search (Brute Force)
//!
//! Exact scan over every stored vector. Used when no graph has been built yet
//! and as ground truth for checking the graph.
//!
//! Records are streamed; only the best `k` are held, in a bounded max-heap.

use std::collections::{BinaryHeap, HashMap};

use cvfs_core::error::{Error, Result};
use cvfs_core::types::VectorRecord;

use crate::distance::squared_l2_unchecked;
use crate::traits::{Candidate, SearchResult};

const PREALLOCATE_LIMIT: usize = 4096;

/// Top `k` records by squared L2 to `query`, ascending; ties by scan order
pub fn search<I>(records: I, query: &[f64], k: usize) -> Result<Vec<SearchResult>>
where
    I: IntoIterator<Item = Result<VectorRecord>>,
{
    search_filtered(records, query, k, |_| true)
}

/// Like [`search`], skipping records for which `keep` returns false
pub fn search_filtered<I, F>(records: I, query: &[f64], k: usize, keep: F) -> Result<Vec<SearchResult>>
where
    I: IntoIterator<Item = Result<VectorRecord>>,
    F: Fn(&VectorRecord) -> bool,
{
    if k == 0 {
        return Ok(Vec::new());
    }

    // `k` may come straight from a query; it bounds the heap, not the allocation.
    let capacity = k.min(PREALLOCATE_LIMIT).saturating_add(1);
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(capacity);
    let mut ids: HashMap<usize, String> = HashMap::with_capacity(capacity);

    for (seq, record) in records.into_iter().enumerate() {
        let record = record?;
        if !keep(&record) {
            continue;
        }
        if record.vector.len() != query.len() {
            return Err(Error::dimension_mismatch(record.vector.len(), query.len()));
        }

        let c = Candidate::new(squared_l2_unchecked(query, &record.vector), seq);
        if heap.len() < k {
            heap.push(c);
            ids.insert(seq, record.id);
        } else if let Some(worst) = heap.peek().copied() {
            if c < worst {
                heap.pop();
                ids.remove(&worst.seq);
                heap.push(c);
                ids.insert(seq, record.id);
            }
        }
    }

    Ok(heap
        .into_sorted_vec()
        .into_iter()
        .filter_map(|c| ids.remove(&c.seq).map(|id| SearchResult::new(id, c.distance)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvfs_core::types::Metadata;

    fn rec(id: &str, v: &[f64]) -> Result<VectorRecord> {
        Ok(VectorRecord::new(id, v.to_vec(), Metadata::new()))
    }

    #[test]
    fn test_huge_k_returns_everything() {
        let records = vec![rec("a", &[1.0]), rec("b", &[0.0])];
        let hits = search(records, &[0.0], usize::MAX).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_top_k_ascending() {
        let records = vec![rec("far", &[9.0, 9.0]), rec("near", &[1.0, 0.0]), rec("mid", &[3.0, 0.0])];
        let hits = search(records, &[0.0, 0.0], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(hits[0].distance, 1.0);
    }

    #[test]
    fn test_ties_keep_scan_order() {
        let records = vec![rec("a", &[1.0]), rec("b", &[-1.0]), rec("c", &[1.0])];
        let hits = search(records, &[0.0], 2).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_filter_and_errors() {
        let records = vec![rec("query_1", &[0.0]), rec("a", &[2.0])];
        let hits = search_filtered(records, &[0.0], 5, |r| !r.is_ephemeral()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        let bad = vec![rec("a", &[1.0, 2.0])];
        assert!(matches!(search(bad, &[0.0], 1), Err(Error::DimensionMismatch { .. })));
        assert!(search(vec![rec("a", &[1.0])], &[0.0], 0).unwrap().is_empty());
    }
}
