//! # Inverted-File Coarse Partition
//!
//! The first `k` distinct vectors become centroids, with no refinement. Every
//! vector then joins the centroid nearest by squared L2; ties go to the
//! earlier centroid. The table is rebuilt wholesale, never patched.
//!
//! Persisted as `ivf_partitions.txt`, one `<centroid_id>|<member ids>` line per
//! partition.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use cvfs_core::error::{Error, Result};

use crate::distance::squared_l2_unchecked;
use crate::line_file;
use crate::traits::{SearchResult, VectorSource};

const HEADER: &str = "CVFS IVF partitions: centroid_id|member_ids";

#[derive(Debug, Clone)]
struct Partition {
    centroid: String,
    centroid_vector: Vec<f64>,
    members: Vec<String>,
}

/// Partition table mapping each centroid to its members
#[derive(Debug, Clone, Default)]
pub struct IvfIndex {
    partitions: Vec<Partition>,
    assignment: HashMap<String, usize>,
    dimension: usize,
}

impl IvfIndex {
    /// Build over `(id, vector)` pairs in insertion order
    pub fn build<I>(records: I, k: usize) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<f64>)>,
    {
        if k == 0 {
            return Err(Error::invalid("IVF k must be greater than zero"));
        }

        let records: Vec<(String, Vec<f64>)> = records.into_iter().collect();
        let mut index = Self::default();
        if let Some((_, first)) = records.first() {
            index.dimension = first.len();
        }

        for (id, vector) in &records {
            if vector.len() != index.dimension {
                return Err(Error::dimension_mismatch(index.dimension, vector.len()));
            }
            if index.partitions.len() == k {
                break;
            }
            // Distinct ids, and distinct points so two centroids never shadow each other.
            let duplicate = index
                .partitions
                .iter()
                .any(|p| p.centroid == *id || p.centroid_vector == *vector);
            if !duplicate {
                index.partitions.push(Partition {
                    centroid: id.clone(),
                    centroid_vector: vector.clone(),
                    members: Vec::new(),
                });
            }
        }

        for (id, vector) in records {
            if vector.len() != index.dimension {
                return Err(Error::dimension_mismatch(index.dimension, vector.len()));
            }
            if let Some(slot) = index.nearest_slot(&vector) {
                index.partitions[slot].members.push(id.clone());
                index.assignment.insert(id, slot);
            }
        }

        info!(
            "Built IVF partitions: k={}, {} centroids, {} vectors",
            k,
            index.partitions.len(),
            index.assignment.len()
        );
        Ok(index)
    }

    fn nearest_slot(&self, vector: &[f64]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (slot, partition) in self.partitions.iter().enumerate() {
            let d = squared_l2_unchecked(vector, &partition.centroid_vector);
            // Strict `<` keeps the earliest centroid on ties.
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((slot, d));
            }
        }
        best.map(|(slot, _)| slot)
    }

    /// Centroid owning `id`
    pub fn partition_of(&self, id: &str) -> Option<&str> {
        self.assignment
            .get(id)
            .map(|&slot| self.partitions[slot].centroid.as_str())
    }

    /// Nearest centroid to `query`, with its squared L2 distance
    pub fn nearest_partition(&self, query: &[f64]) -> Result<SearchResult> {
        if self.partitions.is_empty() {
            return Err(Error::IndexNotBuilt { index: "ivf" });
        }
        if query.len() != self.dimension {
            return Err(Error::dimension_mismatch(self.dimension, query.len()));
        }
        let slot = self
            .nearest_slot(query)
            .ok_or(Error::IndexNotBuilt { index: "ivf" })?;
        let partition = &self.partitions[slot];
        Ok(SearchResult::new(
            partition.centroid.clone(),
            squared_l2_unchecked(query, &partition.centroid_vector),
        ))
    }

    /// Members of the partition whose centroid is `centroid`
    pub fn members(&self, centroid: &str) -> Option<&[String]> {
        self.partitions
            .iter()
            .find(|p| p.centroid == centroid)
            .map(|p| p.members.as_slice())
    }

    pub fn centroids(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.centroid.as_str()).collect()
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn vector_count(&self) -> usize {
        self.assignment.len()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        line_file::write_atomic(
            path,
            HEADER,
            self.partitions
                .iter()
                .map(|p| format!("{}|{}", p.centroid, p.members.join(","))),
        )
    }

    /// Load a partition table, resolving centroid vectors through `source`.
    ///
    /// Returns `None` when the file is missing or empty. Partitions whose
    /// centroid vector is gone are dropped.
    pub fn load(path: &Path, source: &dyn VectorSource) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut index = Self::default();
        for (line_no, raw) in line_file::read_records(path)? {
            let Some((centroid, members)) = raw.split_once('|') else {
                warn!(
                    "Skipping IVF line {} in {:?}: {}",
                    line_no,
                    path,
                    Error::CorruptedRecordLine {
                        line: line_no,
                        reason: "missing '|' separator".to_string(),
                    }
                );
                continue;
            };
            let Some(centroid_vector) = source.vector(centroid) else {
                warn!("Dropping IVF partition {}: centroid no longer stored", centroid);
                continue;
            };
            if index.partitions.is_empty() {
                index.dimension = centroid_vector.len();
            } else if centroid_vector.len() != index.dimension {
                return Err(Error::dimension_mismatch(index.dimension, centroid_vector.len()));
            }

            let slot = index.partitions.len();
            let members = line_file::split_ids(members);
            for member in &members {
                index.assignment.insert(member.clone(), slot);
            }
            index.partitions.push(Partition {
                centroid: centroid.to_string(),
                centroid_vector,
                members,
            });
        }

        if index.partitions.is_empty() {
            return Ok(None);
        }
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(points: &[(&str, [f64; 2])]) -> Vec<(String, Vec<f64>)> {
        points.iter().map(|(id, v)| (id.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn test_first_k_become_centroids() {
        let index = IvfIndex::build(
            records(&[("a", [0.0, 0.0]), ("b", [10.0, 10.0]), ("c", [0.5, 0.0]), ("d", [9.0, 10.0])]),
            2,
        )
        .unwrap();
        assert_eq!(index.centroids(), vec!["a", "b"]);
        assert_eq!(index.partition_of("c"), Some("a"));
        assert_eq!(index.partition_of("d"), Some("b"));
        assert_eq!(index.members("a").unwrap(), &["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_ties_go_to_earlier_centroid() {
        let index = IvfIndex::build(
            records(&[("a", [-1.0, 0.0]), ("b", [1.0, 0.0]), ("mid", [0.0, 0.0])]),
            2,
        )
        .unwrap();
        assert_eq!(index.partition_of("mid"), Some("a"));
    }

    #[test]
    fn test_k_larger_than_n() {
        let index = IvfIndex::build(records(&[("a", [0.0, 0.0]), ("b", [1.0, 0.0])]), 8).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.vector_count(), 2);
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(IvfIndex::build(records(&[("a", [0.0, 0.0])]), 0).is_err());
    }

    #[test]
    fn test_nearest_partition() {
        let index = IvfIndex::build(records(&[("a", [0.0, 0.0]), ("b", [10.0, 0.0])]), 2).unwrap();
        let hit = index.nearest_partition(&[8.0, 0.0]).unwrap();
        assert_eq!(hit.id, "b");
        assert_eq!(hit.distance, 4.0);
        assert!(matches!(index.nearest_partition(&[1.0]), Err(Error::DimensionMismatch { .. })));
        assert!(matches!(
            IvfIndex::default().nearest_partition(&[1.0]),
            Err(Error::IndexNotBuilt { .. })
        ));
    }
}
