//! # CVFS Engine
//!
//! Owns the vector store, the three derived indexes and the operation log.
//! Every primitive call appends one line to the log.
//!
//! Indexes cover durable vectors only: scratch ids (`temp_`, `dist_`,
//! `query_`) are skipped at build time, and hits whose id has since been
//! deleted are filtered out of graph searches.

use std::path::Path;

use tracing::{info, warn};

use cvfs_core::{
    is_ephemeral_id, Config, Error, Metadata, OperationLog, Result, SharedOperationLog, VectorRecord,
};
use cvfs_index::{flat, HnswIndex, IvfIndex, PqCodebook, PqCodebooks, SearchResult, VectorSource};
use cvfs_storage::{CompactionStats, VectorStore};
use cvfs_vpl::VplHost;

/// Resolves index side files against the store
struct StoreSource<'a>(&'a VectorStore);

impl VectorSource for StoreSource<'_> {
    fn vector(&self, id: &str) -> Option<Vec<f64>> {
        match self.0.get(id) {
            Ok(record) => record.map(|r| r.vector),
            Err(e) => {
                warn!("Failed to read vector {} while loading an index: {}", id, e);
                None
            }
        }
    }
}

pub struct Engine {
    config: Config,
    store: VectorStore,
    hnsw: Option<HnswIndex>,
    ivf: Option<IvfIndex>,
    codebooks: PqCodebooks,
    oplog: SharedOperationLog,
}

impl Engine {
    /// Open the store under `config.storage.data_dir` and reload any index
    /// side files found there
    pub fn open(config: Config, oplog: SharedOperationLog) -> Result<Self> {
        let storage = &config.storage;
        std::fs::create_dir_all(&storage.data_dir).map_err(|e| Error::Io {
            message: format!("Failed to create data directory {:?}", storage.data_dir),
            source: e,
        })?;

        let mut store = VectorStore::open(storage.vectors_file())?;
        store.set_sync_writes(storage.sync_writes);

        let source = StoreSource(&store);
        let hnsw = HnswIndex::load(&storage.graph_file(), &config.index.hnsw, &source)?;
        let ivf = IvfIndex::load(&storage.partitions_file(), &source)?;
        let codebooks = PqCodebooks::load(&storage.codebook_file())?;

        info!(
            "Engine ready: {} vectors, hnsw={}, ivf={}, {} codebook(s)",
            store.len(),
            hnsw.is_some(),
            ivf.is_some(),
            codebooks.len()
        );

        Ok(Self {
            config,
            store,
            hnsw,
            ivf,
            codebooks,
            oplog,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn hnsw(&self) -> Option<&HnswIndex> {
        self.hnsw.as_ref()
    }

    pub fn ivf(&self) -> Option<&IvfIndex> {
        self.ivf.as_ref()
    }

    pub fn codebooks(&self) -> &PqCodebooks {
        &self.codebooks
    }

    pub fn log(&self, description: &str) {
        self.oplog.record(description);
    }

    // ========== Store ==========

    pub fn put(&mut self, id: &str, vector: Vec<f64>, metadata: Metadata) -> Result<()> {
        let dim = vector.len();
        self.store.put(id, vector, metadata)?;
        self.log(&format!("V-STORE {} dim={}", id, dim));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        self.store.get(id)
    }

    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let removed = self.store.delete(id)?;
        if removed {
            self.log(&format!("V-DELETE {}", id));
        }
        Ok(removed)
    }

    /// Durable (non-scratch) vectors
    pub fn durable_count(&self) -> usize {
        self.store.ids().iter().filter(|id| !is_ephemeral_id(id)).count()
    }

    fn vector_of(&self, id: &str) -> Result<Vec<f64>> {
        self.store
            .get(id)?
            .map(|r| r.vector)
            .ok_or_else(|| Error::VectorNotFound { id: id.to_string() })
    }

    // ========== Distances ==========

    pub fn cosine_similarity(&self, a: &str, b: &str) -> Result<f64> {
        let s = cvfs_index::cosine_similarity(&self.vector_of(a)?, &self.vector_of(b)?)?;
        self.log(&format!("V-FMA-COS COSINE({}, {}) = {}", a, b, s));
        Ok(s)
    }

    pub fn squared_l2(&self, a: &str, b: &str) -> Result<f64> {
        let d = cvfs_index::squared_l2(&self.vector_of(a)?, &self.vector_of(b)?)?;
        self.log(&format!("V-L2-REDUCE L2({}, {}) = {}", a, b, d));
        Ok(d)
    }

    // ========== Index builds ==========

    /// Durable records in log order
    fn durable_records(&self) -> Result<Vec<(String, Vec<f64>)>> {
        let mut out = Vec::new();
        for record in self.store.scan()? {
            let record = record?;
            if !record.is_ephemeral() {
                out.push((record.id, record.vector));
            }
        }
        Ok(out)
    }

    /// Rebuild the graph and persist it to `graph.txt`. Returns the node count.
    pub fn build_hnsw(&mut self) -> Result<usize> {
        let index = HnswIndex::build(self.durable_records()?, &self.config.index.hnsw)?;
        index.save(&self.config.storage.graph_file())?;

        let nodes = index.len();
        self.log(&format!(
            "V-HNSW-BUILD {} nodes, {} promoted, m={}",
            nodes,
            index.promoted_ids().len(),
            self.config.index.hnsw.m
        ));
        self.hnsw = Some(index);
        Ok(nodes)
    }

    /// Recompute the IVF partition table and persist it. Returns the
    /// partition count.
    pub fn build_ivf(&mut self, k: usize) -> Result<usize> {
        let index = IvfIndex::build(self.durable_records()?, k)?;
        index.save(&self.config.storage.partitions_file())?;

        let partitions = index.len();
        self.log(&format!(
            "V-IVF-BUILD k={} -> {} partitions over {} vectors",
            k,
            partitions,
            index.vector_count()
        ));
        self.ivf = Some(index);
        Ok(partitions)
    }

    /// Train (or retrain) codebook `name` and persist the registry
    pub fn build_pq(&mut self, name: &str, subspace_count: usize) -> Result<()> {
        let vectors: Vec<Vec<f64>> = self.durable_records()?.into_iter().map(|(_, v)| v).collect();
        let codebook = PqCodebook::build(name, &vectors, subspace_count, self.config.index.pq.max_iters)?;
        self.codebooks.insert(codebook);
        self.codebooks.save(&self.config.storage.codebook_file())?;

        self.log(&format!(
            "V-PQ-TRAIN {} subspaces={} over {} vectors",
            name,
            subspace_count,
            vectors.len()
        ));
        Ok(())
    }

    // ========== Queries ==========

    /// The graph, if it has at least one node
    fn graph(&self) -> Result<&HnswIndex> {
        match &self.hnsw {
            Some(index) if index.layer_count() > 0 => Ok(index),
            _ => Err(Error::IndexNotBuilt { index: "hnsw" }),
        }
    }

    /// Graph search; `IndexNotBuilt` when no graph exists or it has no nodes
    pub fn search_hnsw(&self, query: &[f64], k: usize, ef: usize) -> Result<Vec<SearchResult>> {
        let index = self.graph()?;
        let results: Vec<SearchResult> = index
            .search(query, ef.max(k))?
            .into_iter()
            .filter(|r| self.store.contains(&r.id))
            .take(k)
            .collect();
        self.log(&format!("V-HNSW-SEARCH ef={} k={}, found {}", ef.max(k), k, results.len()));
        Ok(results)
    }

    /// Exact scan over durable vectors. Returns the hits and how many vectors
    /// were compared.
    pub fn brute_force(&self, query: &[f64], k: usize) -> Result<(Vec<SearchResult>, usize)> {
        let scanned = std::cell::Cell::new(0usize);
        let results = flat::search_filtered(self.store.scan()?, query, k, |r| {
            let keep = !r.is_ephemeral();
            if keep {
                scanned.set(scanned.get() + 1);
            }
            keep
        })?;
        self.log(&format!(
            "V-L2-SCAN brute force over {} vectors, top {}",
            scanned.get(),
            results.len()
        ));
        Ok((results, scanned.get()))
    }

    /// `CodebookMissing` when `name` has not been built
    pub fn approximate_distance(&self, name: &str, query: &[f64]) -> Result<(f64, Vec<u8>)> {
        let (total, codes) = self.codebooks.approximate_distance(name, query)?;
        self.log(&format!("V-PQ-LOOKUP codebook={} codes={:?} = {}", name, codes, total));
        Ok((total, codes))
    }

    // ========== Maintenance ==========

    /// Drop scratch vectors and superseded lines from the log
    pub fn purge_ephemeral(&mut self) -> Result<CompactionStats> {
        let stats = self.store.compact(|r| !r.is_ephemeral())?;
        self.log(&format!(
            "V-COMPACT purged {} scratch vectors, dropped {} lines, kept {}",
            stats.purged, stats.lines_dropped, stats.kept
        ));
        Ok(stats)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.storage.data_dir
    }
}

impl VplHost for Engine {
    fn record(&self, id: &str) -> Result<Option<VectorRecord>> {
        self.store.get(id)
    }

    fn all_ids(&self) -> Result<Vec<String>> {
        Ok(self.store.ids().into_iter().filter(|id| !is_ephemeral_id(id)).collect())
    }

    fn hnsw_search(&self, query: &[f64], ef: usize) -> Result<Vec<SearchResult>> {
        Ok(self
            .graph()?
            .search(query, ef)?
            .into_iter()
            .filter(|r| self.store.contains(&r.id))
            .collect())
    }

    fn exact_search(&self, query: &[f64], k: usize) -> Result<Vec<SearchResult>> {
        self.brute_force(query, k).map(|(results, _)| results)
    }

    fn ivf_nearest(&self, query: &[f64]) -> Result<SearchResult> {
        self.ivf
            .as_ref()
            .ok_or(Error::IndexNotBuilt { index: "ivf" })?
            .nearest_partition(query)
    }

    fn ivf_members(&self, centroid: &str) -> Result<Vec<String>> {
        let index = self.ivf.as_ref().ok_or(Error::IndexNotBuilt { index: "ivf" })?;
        let members = index
            .members(centroid)
            .ok_or_else(|| Error::invalid(format!("{} is not an IVF centroid", centroid)))?;
        Ok(members
            .iter()
            .filter(|id| self.store.contains(id))
            .cloned()
            .collect())
    }

    fn pq_distance(&self, codebook: &str, query: &[f64]) -> Result<(f64, Vec<u8>)> {
        self.codebooks.approximate_distance(codebook, query)
    }

    fn record_operation(&self, description: &str) {
        self.log(description);
    }
}
