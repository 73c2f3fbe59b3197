//! # Operation Log
//!
//! Append-only record of primitive calls, one line per operation:
//!
//! ```text
//! [2024-05-01T12:00:00.000000Z] V-L2-REDUCE L2(a, b) = 2
//! [2024-05-01T12:00:00.000153Z] V-HNSW-STEP query_1_1 ef=50, found 10 neighbors (graph)
//! ```
//!
//! The log is for observability only; nothing is ever recovered from it.
//! Rotation renames the current file aside, it never rewrites history.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::Timestamp;

/// Sink shared by the engine, the interpreter host and the daemon
pub trait OperationLog: Send + Sync {
    /// Append one operation description
    fn record(&self, description: &str);
}

pub type SharedOperationLog = Arc<dyn OperationLog>;

/// Format a single log line (without the trailing newline)
pub fn format_entry(at: &Timestamp, description: &str) -> String {
    format!(
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Micros, true),
        description.replace('\n', " ")
    )
}

/// Operation log backed by `operations.log`
pub struct FileOperationLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileOperationLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Io {
                message: format!("Failed to open operation log {:?}", path),
                source: e,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// Move the current log to `<name>.1` once it exceeds `max_bytes`.
    /// Returns true if a rotation happened.
    pub fn rotate_if_larger(&self, max_bytes: u64) -> Result<bool> {
        let mut writer = self.writer.lock();
        writer.flush()?;

        let size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size <= max_bytes {
            return Ok(false);
        }

        let rotated = rotated_path(&self.path);
        std::fs::rename(&self.path, &rotated)?;
        *writer = BufWriter::new(Self::open_append(&self.path)?);
        debug!("Rotated operation log ({} bytes) to {:?}", size, rotated);
        Ok(true)
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".1");
    path.with_file_name(name)
}

impl OperationLog for FileOperationLog {
    fn record(&self, description: &str) {
        let line = format_entry(&chrono::Utc::now(), description);
        let mut writer = self.writer.lock();
        // Logging must never fail the operation being logged.
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to append to operation log {:?}: {}", self.path, e);
        }
    }
}

/// In-memory operation log, handy for tests and embedding
#[derive(Default)]
pub struct MemoryOperationLog {
    entries: Mutex<Vec<String>>,
}

impl MemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries whose description contains `needle`
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.contains(needle))
            .cloned()
            .collect()
    }
}

impl OperationLog for MemoryOperationLog {
    fn record(&self, description: &str) {
        self.entries
            .lock()
            .push(format_entry(&chrono::Utc::now(), description));
    }
}
