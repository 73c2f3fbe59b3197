//! # Product Quantization
//!
//! A codebook splits the dimensionality into `subspace_count` equal slices and
//! clusters each slice independently (bounded Lloyd's iterations, at most 256
//! centroids per slice, so a code fits in a byte).
//!
//! ```text
//! vector:   [ x0 x1 | x2 x3 | x4 x5 | x6 x7 ]
//!             sub 0   sub 1   sub 2   sub 3
//! code:     [  17   |  3    |  250  |  0    ]   u8 per subspace
//! ```
//!
//! `approximate_distance` is the sum of the per-slice squared L2 to the nearest
//! centroid of that slice. Codebooks are immutable until rebuilt.
//!
//! Persisted as `codebooks.txt`: `<name>|subspace_<s>|<json centroid list>`.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use cvfs_core::error::{Error, Result};

use crate::distance::squared_l2_unchecked;
use crate::line_file;

/// Upper bound on centroids per subspace
pub const MAX_CENTROIDS: usize = 256;

const HEADER: &str = "CVFS PQ codebooks: name|subspace_key|centroids";

/// Codebook for one name
#[derive(Debug, Clone, PartialEq)]
pub struct PqCodebook {
    name: String,
    sub_dim: usize,
    /// `centroids[s][c]` is centroid `c` of subspace `s`
    centroids: Vec<Vec<Vec<f64>>>,
}

impl PqCodebook {
    /// Train a codebook over `vectors`
    pub fn build(name: &str, vectors: &[Vec<f64>], subspace_count: usize, max_iters: usize) -> Result<Self> {
        if subspace_count == 0 {
            return Err(Error::invalid("PQ subspace_count must be greater than zero"));
        }
        let Some(first) = vectors.first() else {
            return Err(Error::invalid(format!("cannot build codebook {} without vectors", name)));
        };
        let dim = first.len();
        if dim == 0 || dim % subspace_count != 0 {
            return Err(Error::invalid(format!(
                "dimension {} is not divisible by subspace_count {}",
                dim, subspace_count
            )));
        }
        if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::dimension_mismatch(dim, v.len()));
        }

        let sub_dim = dim / subspace_count;
        let k = vectors.len().min(MAX_CENTROIDS);
        let mut centroids = Vec::with_capacity(subspace_count);
        for s in 0..subspace_count {
            let slices: Vec<&[f64]> = vectors.iter().map(|v| &v[s * sub_dim..(s + 1) * sub_dim]).collect();
            centroids.push(lloyd(&slices, k, max_iters));
        }

        info!(
            "Built PQ codebook {}: {} subspaces x {} centroids (sub_dim={})",
            name, subspace_count, k, sub_dim
        );
        Ok(Self {
            name: name.to_string(),
            sub_dim,
            centroids,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subspace_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn dimension(&self) -> usize {
        self.sub_dim * self.centroids.len()
    }

    pub fn centroids(&self, subspace: usize) -> Option<&[Vec<f64>]> {
        self.centroids.get(subspace).map(Vec::as_slice)
    }

    /// Total quantized distance of `query` and its per-subspace codes
    pub fn approximate_distance(&self, query: &[f64]) -> Result<(f64, Vec<u8>)> {
        if query.len() != self.dimension() {
            return Err(Error::dimension_mismatch(self.dimension(), query.len()));
        }

        let mut total = 0.0;
        let mut codes = Vec::with_capacity(self.centroids.len());
        for (s, centroids) in self.centroids.iter().enumerate() {
            let slice = &query[s * self.sub_dim..(s + 1) * self.sub_dim];
            let (code, dist) = nearest(slice, centroids);
            total += dist;
            // At most MAX_CENTROIDS per subspace.
            codes.push(code as u8);
        }

        debug!("PQ distance via {}: {} codes, total={}", self.name, codes.len(), total);
        Ok((total, codes))
    }

    pub fn encode(&self, vector: &[f64]) -> Result<Vec<u8>> {
        self.approximate_distance(vector).map(|(_, codes)| codes)
    }

    fn subspace_key(s: usize) -> String {
        format!("subspace_{}", s)
    }

    /// One line per subspace. Non-finite centroids would come back as `null`
    /// and lose the codebook on load, so they are refused here.
    fn encode_lines(&self) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(self.centroids.len());
        for (s, centroids) in self.centroids.iter().enumerate() {
            if centroids.iter().flatten().any(|x| !x.is_finite()) {
                return Err(Error::Serialization {
                    message: format!("codebook {} has a non-finite centroid in subspace {}", self.name, s),
                });
            }
            let json = serde_json::to_string(centroids)?;
            lines.push(format!("{}|{}|{}", self.name, Self::subspace_key(s), json));
        }
        Ok(lines)
    }
}

/// Nearest centroid index and its squared distance; earliest wins ties
fn nearest(slice: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_l2_unchecked(slice, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Bounded Lloyd's iterations seeded with the first `k` points
fn lloyd(points: &[&[f64]], k: usize, max_iters: usize) -> Vec<Vec<f64>> {
    let mut centroids: Vec<Vec<f64>> = points.iter().take(k).map(|p| p.to_vec()).collect();
    let sub_dim = centroids.first().map_or(0, Vec::len);

    for iter in 0..max_iters {
        let mut sums = vec![vec![0.0; sub_dim]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for p in points {
            let (c, _) = nearest(p, &centroids);
            counts[c] += 1;
            for (acc, x) in sums[c].iter_mut().zip(p.iter()) {
                *acc += x;
            }
        }

        let updated: Vec<Vec<f64>> = centroids
            .iter()
            .zip(sums)
            .zip(&counts)
            .map(|((old, sum), &count)| {
                if count == 0 {
                    // Empty cluster keeps its previous centroid.
                    old.clone()
                } else {
                    sum.into_iter().map(|s| s / count as f64).collect()
                }
            })
            .collect();

        if updated == centroids {
            debug!("PQ clustering converged after {} iterations", iter + 1);
            break;
        }
        centroids = updated;
    }
    centroids
}

/// Named codebooks, as stored in `codebooks.txt`
#[derive(Debug, Clone, Default)]
pub struct PqCodebooks {
    books: BTreeMap<String, PqCodebook>,
}

impl PqCodebooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, codebook: PqCodebook) {
        self.books.insert(codebook.name.clone(), codebook);
    }

    pub fn get(&self, name: &str) -> Result<&PqCodebook> {
        self.books.get(name).ok_or_else(|| Error::CodebookMissing { name: name.to_string() })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.books.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.books.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// `CodebookMissing` when `name` was never built
    pub fn approximate_distance(&self, name: &str, query: &[f64]) -> Result<(f64, Vec<u8>)> {
        self.get(name)?.approximate_distance(query)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut lines = Vec::new();
        for book in self.books.values() {
            lines.extend(book.encode_lines()?);
        }
        line_file::write_atomic(path, HEADER, lines)
    }

    /// Load every codebook in `path`; a missing file is an empty registry.
    /// Malformed lines are skipped; a codebook with inconsistent slices is dropped.
    pub fn load(path: &Path) -> Result<Self> {
        let mut registry = Self::new();
        if !path.exists() {
            return Ok(registry);
        }

        let mut raw: BTreeMap<String, BTreeMap<usize, Vec<Vec<f64>>>> = BTreeMap::new();
        for (line_no, line) in line_file::read_records(path)? {
            match parse_line(&line, line_no) {
                Ok((name, s, centroids)) => {
                    raw.entry(name).or_default().insert(s, centroids);
                }
                Err(e) => warn!("Skipping codebook line in {:?}: {}", path, e),
            }
        }

        for (name, slices) in raw {
            let contiguous = slices.keys().copied().eq(0..slices.len());
            let sub_dim = slices
                .values()
                .flat_map(|c| c.iter())
                .map(Vec::len)
                .next()
                .unwrap_or(0);
            let uniform = slices.values().flat_map(|c| c.iter()).all(|c| c.len() == sub_dim);
            if !contiguous || !uniform || sub_dim == 0 || slices.values().any(Vec::is_empty) {
                warn!("Dropping inconsistent codebook {} from {:?}", name, path);
                continue;
            }
            registry.insert(PqCodebook {
                name,
                sub_dim,
                centroids: slices.into_values().collect(),
            });
        }
        Ok(registry)
    }
}

fn parse_line(line: &str, line_no: usize) -> Result<(String, usize, Vec<Vec<f64>>)> {
    let corrupted = |reason: String| Error::CorruptedRecordLine { line: line_no, reason };

    let mut parts = line.splitn(3, '|');
    let name = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| corrupted("missing codebook name".to_string()))?;
    let key = parts.next().ok_or_else(|| corrupted("missing subspace key".to_string()))?;
    let s = key
        .strip_prefix("subspace_")
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| corrupted(format!("bad subspace key {:?}", key)))?;
    let json = parts.next().ok_or_else(|| corrupted("missing centroids".to_string()))?;
    let centroids: Vec<Vec<f64>> =
        serde_json::from_str(json).map_err(|e| corrupted(format!("centroids: {}", e)))?;
    if centroids.len() > MAX_CENTROIDS {
        return Err(corrupted(format!("{} centroids exceed {}", centroids.len(), MAX_CENTROIDS)));
    }
    Ok((name.to_string(), s, centroids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_refuses_non_finite_centroids() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("codebooks.txt");
        let mut registry = PqCodebooks::new();
        registry.insert(PqCodebook::build("bad", &[vec![f64::NAN, 1.0], vec![2.0, 3.0]], 1, 3).unwrap());

        assert!(matches!(registry.save(&path), Err(Error::Serialization { .. })));
        assert!(!path.exists());
    }

    fn clustered() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.1, 0.0, 0.1],
            vec![0.1, 0.0, 0.1, 0.0],
            vec![10.0, 10.1, 10.0, 10.1],
            vec![10.1, 10.0, 10.1, 10.0],
        ]
    }

    #[test]
    fn test_dimension_must_divide() {
        let err = PqCodebook::build("d", &clustered(), 3, 10).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { .. }));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(PqCodebook::build("d", &[], 2, 10).is_err());
    }

    #[test]
    fn test_centroid_count_bounded_by_n() {
        let book = PqCodebook::build("d", &clustered(), 2, 10).unwrap();
        assert_eq!(book.subspace_count(), 2);
        assert!(book.centroids(0).unwrap().len() <= 4);
        assert_eq!(book.dimension(), 4);
    }

    #[test]
    fn test_lloyd_merges_and_keeps_empty() {
        let points: Vec<&[f64]> = vec![&[0.0], &[10.0], &[1.0], &[11.0]];
        // k=2: seeds 0 and 10; clusters {0,1} and {10,11}
        let centroids = lloyd(&points, 2, 10);
        assert_eq!(centroids, vec![vec![0.5], vec![10.5]]);

        // Duplicate seeds: the second loses every tie, so its cluster is empty.
        let points: Vec<&[f64]> = vec![&[2.0], &[2.0], &[4.0]];
        let centroids = lloyd(&points, 2, 1);
        assert_eq!(centroids, vec![vec![8.0 / 3.0], vec![2.0]]);
    }

    #[test]
    fn test_codes_pick_nearest_centroid() {
        let book = PqCodebook::build("d", &clustered(), 2, 10).unwrap();
        let (dist, codes) = book.approximate_distance(&clustered()[0]).unwrap();
        assert_eq!(codes.len(), 2);
        assert!(dist < 1e-9);
        assert_eq!(book.encode(&clustered()[0]).unwrap(), codes);
        assert!(book.approximate_distance(&[1.0]).is_err());
    }

    #[test]
    fn test_missing_codebook() {
        let registry = PqCodebooks::new();
        let err = registry.approximate_distance("default", &[1.0]).unwrap_err();
        assert!(matches!(err, Error::CodebookMissing { name } if name == "default"));
    }

    #[test]
    fn test_save_load_line_format() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("codebooks.txt");

        let mut registry = PqCodebooks::new();
        registry.insert(PqCodebook::build("default", &clustered(), 2, 10).unwrap());
        registry.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.lines().any(|l| l.starts_with("default|subspace_0|[[")));
        assert!(content.lines().any(|l| l.starts_with("default|subspace_1|[[")));

        let loaded = PqCodebooks::load(&path).unwrap();
        assert_eq!(loaded.get("default").unwrap(), registry.get("default").unwrap());
    }

    #[test]
    fn test_load_skips_bad_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("codebooks.txt");
        std::fs::write(
            &path,
            "# books\nok|subspace_0|[[1.0],[2.0]]\nok|subspace_1|[[3.0]]\nbad|subspace_x|[]\nhalf|subspace_1|[[1.0]]\n",
        )
        .unwrap();

        let loaded = PqCodebooks::load(&path).unwrap();
        assert_eq!(loaded.names(), vec!["ok"]);
        assert_eq!(loaded.get("ok").unwrap().dimension(), 2);
    }
}
