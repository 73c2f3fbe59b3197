//! # CVFS Daemon
//!
//! The process that owns a CVFS data directory.
//!
//! ```ignore
//! let mut daemon = CvfsDaemon::open(Config::for_data_dir("./cvfs_data"))?;
//! daemon.engine_mut().put("doc_1", vec![0.1, 0.9], Metadata::new())?;
//! daemon.build_hnsw_index()?;
//! let response = daemon.process_vector_query(vec![0.1, 0.8], "semantic_search", 5, None);
//! ```
//!
//! ## Layout
//!
//! - `engine`: store + indexes + operation log, the VPL host
//! - `programs`: VPL template library
//! - `queue`: pending / processed query files
//! - `state`: explicit engine state and rebuild watermarks
//! - `daemon`: the cycle, query dispatch and shutdown

pub mod daemon;
pub mod engine;
pub mod programs;
pub mod queue;
pub mod state;

pub use daemon::{shutdown_on, CvfsDaemon, CycleReport, QueryError, QueryResponse, SearchMethod, SearchResponse};
pub use engine::Engine;
pub use programs::ProgramLibrary;
pub use state::{EngineState, FinalState, Phase};
