//! # CVFS Daemon
//!
//! Owns an [`Engine`] and drives it through a fixed cycle:
//!
//! ```text
//! Idle ──> Optimizing ──> ProcessingQueries ──> Idle ──> (sleep) ──> ...
//!            │                 │
//!            │                 └─ drain pending_queries.txt through VPL
//!            └─ purge scratch vectors, compact, rebuild indexes past their
//!               watermark, rotate operations.log
//! ```
//!
//! Queries are VPL templates with `$query_id`, `$top_k` and `$filter`
//! substituted before interpretation. Errors follow one policy: a missing
//! graph falls back to brute force, a missing codebook is built and the
//! lookup retried once, everything else is surfaced.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use cvfs_core::{
    Config, Error, FileOperationLog, Metadata, OperationLog, Result, SharedOperationLog,
};
use cvfs_index::SearchResult;
use cvfs_vpl::{Interpreter, VplValue};

use crate::engine::Engine;
use crate::programs::{ProgramLibrary, SEMANTIC_SEARCH};
use crate::queue::{self, PendingLine, ProcessedEntry, ProcessedStatus};
use crate::state::{EngineState, FinalState, Phase, Watermark};

/// Error attached to a query that produced no result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&Error> for QueryError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.error_code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub query_type: String,
    pub results: VplValue,
    pub result_count: usize,
    /// Seconds spent storing the query and interpreting the template
    pub execution_time: f64,
    /// Statements skipped during interpretation
    pub statement_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<QueryError>,
}

impl QueryResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Hnsw,
    BruteForce,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub method: SearchMethod,
    pub results: Vec<SearchResult>,
    /// Vectors compared; only known for brute force
    pub vectors_searched: Option<usize>,
}

impl SearchResponse {
    pub fn to_json(&self) -> Value {
        json!({
            "method": self.method,
            "results": self.results.iter().map(SearchResult::to_json).collect::<Vec<_>>(),
            "vectors_searched": self.vectors_searched,
        })
    }
}

/// What one optimization pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub vector_count: usize,
    pub purged: usize,
    pub lines_dropped: usize,
    pub hnsw_rebuilt: bool,
    pub ivf_rebuilt: bool,
    pub pq_rebuilt: bool,
    pub log_rotated: bool,
}

pub struct CvfsDaemon {
    config: Config,
    engine: Engine,
    programs: ProgramLibrary,
    state: EngineState,
    oplog: Arc<FileOperationLog>,
}

impl CvfsDaemon {
    /// Open the data directory: operation log, store, saved indexes and the
    /// program library
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = &config.storage;
        std::fs::create_dir_all(&storage.data_dir).map_err(|e| Error::Io {
            message: format!("Failed to create data directory {:?}", storage.data_dir),
            source: e,
        })?;

        let oplog = Arc::new(FileOperationLog::open(storage.operations_log())?);
        let shared: SharedOperationLog = oplog.clone();
        let engine = Engine::open(config.clone(), shared)?;
        let programs = ProgramLibrary::load_or_init(&storage.programs_dir())?;

        // Indexes reloaded from disk count as built at the current size, so a
        // restart does not trigger an immediate rebuild.
        let count = engine.store().len();
        let daemon_config = &config.daemon;
        let mut state = EngineState {
            hnsw_built: engine.hnsw().is_some(),
            ivf_built: engine.ivf().is_some(),
            pq_built: !engine.codebooks().is_empty(),
            ..EngineState::default()
        };
        let mark = |built: bool, every: usize| {
            let mut m = Watermark::default();
            if built {
                m.crossed(count, every);
            }
            m
        };
        state.hnsw_mark = mark(state.hnsw_built, daemon_config.hnsw_rebuild_every);
        state.ivf_mark = mark(state.ivf_built, daemon_config.ivf_rebuild_every);
        state.pq_mark = mark(state.pq_built, daemon_config.pq_rebuild_every);

        info!(
            "CVFS daemon opened {:?}: {} vectors, {} programs",
            storage.data_dir,
            count,
            programs.len()
        );

        Ok(Self {
            config,
            engine,
            programs,
            state,
            oplog,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn programs(&self) -> &ProgramLibrary {
        &self.programs
    }

    // ========== Queries ==========

    fn next_query_id(&mut self) -> String {
        self.state.queries_processed += 1;
        format!("query_{}_{}", Utc::now().timestamp(), self.state.queries_processed)
    }

    /// Store `vector` under a fresh `query_` id and run the `query_type`
    /// template against it. Never fails: errors come back inside the response.
    pub fn process_vector_query(
        &mut self,
        vector: Vec<f64>,
        query_type: &str,
        top_k: usize,
        filter: Option<&str>,
    ) -> QueryResponse {
        let query_id = self.next_query_id();
        let start = Instant::now();

        if let Err(e) = self.engine.put(&query_id, vector, Metadata::new()) {
            warn!("Query {} rejected: {}", query_id, e);
            self.state.note(format!("query {} failed", query_id));
            return QueryResponse {
                query_id,
                query_type: query_type.to_string(),
                results: VplValue::empty_list(),
                result_count: 0,
                execution_time: start.elapsed().as_secs_f64(),
                statement_errors: Vec::new(),
                error: Some(QueryError::from(&e)),
            };
        }

        let params: HashMap<String, String> = [
            ("query_id", query_id.clone()),
            ("top_k", top_k.to_string()),
            ("filter", escape_for_string_literal(filter.unwrap_or(""))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let template = self.programs.resolve(query_type);
        let outcome = Interpreter::new(&self.engine).run(template, &params);
        let execution_time = start.elapsed().as_secs_f64();
        let result_count = outcome.value.result_count();

        self.engine.log(&format!(
            "QUERY {}",
            json!({
                "query_id": query_id,
                "query_type": query_type,
                "execution_time": execution_time,
                "result_count": result_count,
            })
        ));
        self.state.note(format!("query {}", query_id));
        debug!(
            "Query {} ({}) returned {} result(s) in {:.6}s",
            query_id, query_type, result_count, execution_time
        );

        QueryResponse {
            query_id,
            query_type: query_type.to_string(),
            results: outcome.value,
            result_count,
            execution_time,
            statement_errors: outcome.errors.iter().map(Error::to_string).collect(),
            error: None,
        }
    }

    /// Nearest stored vectors to `query`: through the graph when one is built
    /// and `use_hnsw` is set, otherwise by brute force
    pub fn semantic_search(&mut self, query: &[f64], top_k: usize, use_hnsw: bool) -> Result<SearchResponse> {
        self.state.queries_processed += 1;

        if use_hnsw {
            match self.engine.search_hnsw(query, top_k, self.config.index.hnsw.ef_search) {
                Ok(results) => {
                    self.state.note("semantic search (hnsw)");
                    return Ok(SearchResponse {
                        method: SearchMethod::Hnsw,
                        results,
                        vectors_searched: None,
                    });
                }
                Err(Error::IndexNotBuilt { .. }) => {
                    debug!("No graph built yet, falling back to brute force");
                }
                Err(e) => return Err(e),
            }
        }

        let (results, scanned) = self.engine.brute_force(query, top_k)?;
        self.state.note("semantic search (brute force)");
        Ok(SearchResponse {
            method: SearchMethod::BruteForce,
            results,
            vectors_searched: Some(scanned),
        })
    }

    /// Approximate distance through codebook `name`, building the codebook
    /// first if it does not exist yet
    pub fn approximate_distance(&mut self, name: &str, query: &[f64]) -> Result<(f64, Vec<u8>)> {
        match self.engine.approximate_distance(name, query) {
            Err(Error::CodebookMissing { .. }) => {
                info!("Codebook {} missing, building it and retrying", name);
                self.build_pq_codebooks(name, self.config.index.pq.subspace_count)?;
                self.engine.approximate_distance(name, query)
            }
            other => other,
        }
    }

    // ========== Index builds ==========

    pub fn build_hnsw_index(&mut self) -> Result<usize> {
        let nodes = self.engine.build_hnsw()?;
        self.state.hnsw_built = true;
        self.state.note("build_hnsw_index");
        Ok(nodes)
    }

    pub fn build_ivf_partitions(&mut self, k: usize) -> Result<usize> {
        let partitions = self.engine.build_ivf(k)?;
        self.state.ivf_built = true;
        self.state.note("build_ivf_partitions");
        Ok(partitions)
    }

    pub fn build_pq_codebooks(&mut self, name: &str, subspace_count: usize) -> Result<()> {
        self.engine.build_pq(name, subspace_count)?;
        self.state.pq_built = true;
        self.state.note("build_pq_codebooks");
        Ok(())
    }

    // ========== Cycle ==========

    /// Purge scratch vectors (compacting the log), rebuild every index whose
    /// watermark was crossed, then rotate the operation log if it grew too
    /// large. A failed rebuild is logged and does not stop the others.
    pub fn run_optimization_cycle(&mut self) -> Result<CycleReport> {
        let purge = self.engine.purge_ephemeral()?;
        let count = self.engine.store().len();
        let daemon = self.config.daemon.clone();
        let index = self.config.index.clone();

        let mut report = CycleReport {
            vector_count: count,
            purged: purge.purged,
            lines_dropped: purge.lines_dropped,
            ..CycleReport::default()
        };

        if self.state.hnsw_mark.crossed(count, daemon.hnsw_rebuild_every) {
            info!("Rebuilding HNSW index at {} vectors", count);
            match self.build_hnsw_index() {
                Ok(_) => report.hnsw_rebuilt = true,
                Err(e) => error!("HNSW rebuild failed: {}", e),
            }
        }
        if self.state.ivf_mark.crossed(count, daemon.ivf_rebuild_every) {
            info!("Rebuilding IVF partitions at {} vectors", count);
            match self.build_ivf_partitions(index.ivf.k) {
                Ok(_) => report.ivf_rebuilt = true,
                Err(e) => error!("IVF rebuild failed: {}", e),
            }
        }
        if self.state.pq_mark.crossed(count, daemon.pq_rebuild_every) {
            info!("Retraining PQ codebook {} at {} vectors", index.pq.codebook_name, count);
            match self.build_pq_codebooks(&index.pq.codebook_name, index.pq.subspace_count) {
                Ok(()) => report.pq_rebuilt = true,
                Err(e) => error!("PQ rebuild failed: {}", e),
            }
        }

        match self.oplog.rotate_if_larger(daemon.operation_log_max_bytes) {
            Ok(rotated) => report.log_rotated = rotated,
            Err(e) => warn!("Operation log rotation failed: {}", e),
        }

        self.engine.log(&format!(
            "OPTIMIZE vectors={} purged={} hnsw={} ivf={} pq={}",
            count, report.purged, report.hnsw_rebuilt, report.ivf_rebuilt, report.pq_rebuilt
        ));
        self.state.note("run_optimization_cycle");
        info!("Optimization complete. Vectors: {}", count);
        Ok(report)
    }

    /// Drain `pending_queries.txt`. Returns the number of lines handled.
    pub fn process_pending_queries(&mut self) -> Result<usize> {
        let pending_path = self.config.storage.pending_queries_file();
        if !pending_path.exists() {
            return Ok(0);
        }

        let lines = queue::read_pending(&pending_path)?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            let entry = match line {
                PendingLine::Query(query) => {
                    let query_json = serde_json::to_value(&query)?;
                    let top_k = query.top_k.unwrap_or(self.config.daemon.default_top_k);
                    let filter = query.filter_text();
                    let response =
                        self.process_vector_query(query.vector, &query.query_type, top_k, filter.as_deref());
                    match &response.error {
                        None => ProcessedEntry {
                            query: query_json,
                            status: ProcessedStatus::Processed,
                            results: Some(serde_json::to_value(&response)?),
                            error: None,
                        },
                        Some(e) => ProcessedEntry {
                            query: query_json,
                            status: ProcessedStatus::Error,
                            results: None,
                            error: Some(format!("{}: {}", e.kind, e.message)),
                        },
                    }
                }
                PendingLine::Malformed { raw, error } => ProcessedEntry {
                    query: Value::String(raw),
                    status: ProcessedStatus::Error,
                    results: None,
                    error: Some(error),
                },
            };
            entries.push(entry);
        }

        queue::append_processed(&self.config.storage.processed_queries_file(), &entries)?;
        queue::reset_pending(&pending_path)?;
        if !entries.is_empty() {
            info!("Processed {} pending queries", entries.len());
        }
        Ok(entries.len())
    }

    /// One full pass: optimize, then drain pending queries
    pub fn run_cycle(&mut self) -> Result<()> {
        self.state.enter(Phase::Optimizing)?;
        if let Err(e) = self.run_optimization_cycle() {
            error!("Optimization cycle failed: {}", e);
        }

        self.state.enter(Phase::ProcessingQueries)?;
        if let Err(e) = self.process_pending_queries() {
            error!("Error processing pending queries: {}", e);
        }

        self.state.enter(Phase::Idle)?;
        self.state.cycles_completed += 1;
        Ok(())
    }

    /// Cycle until `shutdown` resolves, sleeping `sleep_interval` between
    /// cycles. A cycle in progress always finishes. Writes the final state
    /// before returning it.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<FinalState>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let sleep_interval = self.config.daemon.sleep_interval;
        info!("CVFS daemon running, sleep interval {:?}", sleep_interval);

        loop {
            self.run_cycle()?;
            tokio::select! {
                _ = tokio::time::sleep(sleep_interval) => {}
                _ = &mut shutdown => {
                    info!("Shutting down CVFS daemon");
                    break;
                }
            }
        }

        self.save_final_state()
    }

    pub fn final_state(&self) -> FinalState {
        FinalState::capture(&self.state, self.engine.store().len())
    }

    /// Flush everything and write `daemon_state.txt`
    pub fn save_final_state(&mut self) -> Result<FinalState> {
        self.engine.flush()?;
        self.oplog.flush()?;

        let state = self.final_state();
        let path: PathBuf = self.config.storage.state_file();
        std::fs::write(&path, format!("{}\n", serde_json::to_string_pretty(&state)?)).map_err(|e| Error::Io {
            message: format!("Failed to write daemon state {:?}", path),
            source: e,
        })?;
        self.oplog.record(&format!(
            "SHUTDOWN queries_processed={} vectors_count={}",
            state.queries_processed, state.vectors_count
        ));
        info!("Final state saved to {:?}", path);
        Ok(state)
    }

    /// Shorthand for the default search template
    pub fn query(&mut self, vector: Vec<f64>, top_k: usize) -> QueryResponse {
        self.process_vector_query(vector, SEMANTIC_SEARCH, top_k, None)
    }
}

/// Resolve when `signal` fires. A signal that cannot be installed never
/// resolves, so the daemon keeps cycling instead of stopping after one pass.
pub async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!("Failed to listen for shutdown signal, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Escape `raw` so it can sit inside a double-quoted VPL string literal
fn escape_for_string_literal(raw: &str) -> String {
    let quoted = Value::String(raw.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
