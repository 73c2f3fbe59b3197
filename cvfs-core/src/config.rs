//! # Configuration Management
//!
//! Handles all configuration for CVFS components.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub daemon: DaemonConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Io {
            message: format!("Failed to read config {:?}", path),
            source: e,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Configuration {
            message: format!("{:?}: {}", path, e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let hnsw = &self.index.hnsw;
        let checks = [
            (hnsw.m, "index.hnsw.m"),
            (hnsw.window, "index.hnsw.window"),
            (hnsw.promotion_stride, "index.hnsw.promotion_stride"),
            (hnsw.ef_search, "index.hnsw.ef_search"),
            (self.index.ivf.k, "index.ivf.k"),
            (self.index.pq.subspace_count, "index.pq.subspace_count"),
            (self.index.pq.max_iters, "index.pq.max_iters"),
            (self.daemon.hnsw_rebuild_every, "daemon.hnsw_rebuild_every"),
            (self.daemon.ivf_rebuild_every, "daemon.ivf_rebuild_every"),
            (self.daemon.pq_rebuild_every, "daemon.pq_rebuild_every"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(Error::Configuration {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cvfs_data"),
            sync_writes: false,
        }
    }
}

impl StorageConfig {
    pub fn vectors_file(&self) -> PathBuf {
        self.data_dir.join("vectors.txt")
    }

    pub fn graph_file(&self) -> PathBuf {
        self.data_dir.join("graph.txt")
    }

    pub fn codebook_file(&self) -> PathBuf {
        self.data_dir.join("codebooks.txt")
    }

    pub fn partitions_file(&self) -> PathBuf {
        self.data_dir.join("ivf_partitions.txt")
    }

    pub fn operations_log(&self) -> PathBuf {
        self.data_dir.join("operations.log")
    }

    pub fn programs_dir(&self) -> PathBuf {
        self.data_dir.join("programs")
    }

    pub fn pending_queries_file(&self) -> PathBuf {
        self.data_dir.join("pending_queries.txt")
    }

    pub fn processed_queries_file(&self) -> PathBuf {
        self.data_dir.join("processed_queries.txt")
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("daemon_state.txt")
    }
}

/// Index configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub hnsw: HnswConfig,
    pub ivf: IvfConfig,
    pub pq: PqConfig,
}

/// Two-layer proximity graph parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    /// Max neighbors kept per node and layer
    pub m: usize,
    /// Number of most recently inserted nodes compared against a new node
    pub window: usize,
    /// Every `promotion_stride`-th node joins layer 1
    pub promotion_stride: usize,
    /// Candidate list size used by searches that don't pass their own
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            window: 100,
            promotion_stride: 10,
            ef_search: 50,
        }
    }
}

/// Coarse partition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfConfig {
    pub k: usize,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self { k: 8 }
    }
}

/// Product quantization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PqConfig {
    pub codebook_name: String,
    pub subspace_count: usize,
    pub max_iters: usize,
}

impl Default for PqConfig {
    fn default() -> Self {
        Self {
            codebook_name: "default".to_string(),
            subspace_count: 4,
            max_iters: 10,
        }
    }
}

/// Daemon scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub sleep_interval: Duration,
    pub hnsw_rebuild_every: usize,
    pub ivf_rebuild_every: usize,
    pub pq_rebuild_every: usize,
    /// Rotate operations.log once it grows past this size
    pub operation_log_max_bytes: u64,
    pub default_top_k: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sleep_interval: Duration::from_secs(60),
            hnsw_rebuild_every: 1_000,
            ivf_rebuild_every: 5_000,
            pq_rebuild_every: 10_000,
            operation_log_max_bytes: 64 * 1024 * 1024, // 64MB
            default_top_k: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::Configuration {
                message: format!("unknown log level: {}", other),
            }),
        }
    }
}

/// Log formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Compact,
}
