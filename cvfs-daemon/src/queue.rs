//! File-backed query queue.
//!
//! Producers append JSON lines to `pending_queries.txt`:
//!
//! ```text
//! {"vector": [0.1, 0.2], "type": "hybrid_search", "top_k": 5, "filter": "{\"lang\": \"en\"}"}
//! ```
//!
//! Each drain appends one outcome line per query to `processed_queries.txt`
//! and resets the pending file to its header.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use cvfs_core::{Error, Result};

use crate::programs::SEMANTIC_SEARCH;

pub const PENDING_HEADER: &str = "# Processed queries";

fn default_query_type() -> String {
    SEMANTIC_SEARCH.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuery {
    pub vector: Vec<f64>,
    #[serde(rename = "type", default = "default_query_type")]
    pub query_type: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// A JSON object, or a string holding one
    #[serde(default)]
    pub filter: Option<Value>,
}

impl PendingQuery {
    /// Filter as the text substituted for `$filter`
    pub fn filter_text(&self) -> Option<String> {
        match &self.filter {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// One line of the pending file
#[derive(Debug, Clone, PartialEq)]
pub enum PendingLine {
    Query(PendingQuery),
    Malformed { raw: String, error: String },
}

/// Read every query line; a missing file is an empty queue
pub fn read_pending(path: &Path) -> Result<Vec<PendingLine>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
        message: format!("Failed to read pending queries {:?}", path),
        source: e,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|raw| match serde_json::from_str::<PendingQuery>(raw) {
            Ok(query) => PendingLine::Query(query),
            Err(e) => {
                warn!("Malformed pending query {:?}: {}", raw, e);
                PendingLine::Malformed {
                    raw: raw.to_string(),
                    error: e.to_string(),
                }
            }
        })
        .collect())
}

/// Outcome line written to the processed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub query: Value,
    pub status: ProcessedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    Processed,
    Error,
}

pub fn append_processed(path: &Path, entries: &[ProcessedEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Io {
            message: format!("Failed to open processed queries {:?}", path),
            source: e,
        })?;
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    file.write_all(out.as_bytes())?;
    Ok(())
}

pub fn reset_pending(path: &Path) -> Result<()> {
    std::fs::write(path, format!("{}\n", PENDING_HEADER))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_pending_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pending_queries.txt");
        std::fs::write(
            &path,
            "# Processed queries\n\
             {\"vector\": [1.0, 2.0]}\n\
             \n\
             {\"vector\": [3.0], \"type\": \"hybrid_search\", \"top_k\": 2, \"filter\": {\"lang\": \"en\"}}\n\
             not json\n",
        )
        .unwrap();

        let lines = read_pending(&path).unwrap();
        assert_eq!(lines.len(), 3);
        match &lines[0] {
            PendingLine::Query(q) => {
                assert_eq!(q.query_type, SEMANTIC_SEARCH);
                assert_eq!(q.top_k, None);
                assert_eq!(q.filter_text(), None);
            }
            other => panic!("unexpected line {:?}", other),
        }
        match &lines[1] {
            PendingLine::Query(q) => {
                assert_eq!(q.query_type, "hybrid_search");
                assert_eq!(q.filter_text().as_deref(), Some(r#"{"lang":"en"}"#));
            }
            other => panic!("unexpected line {:?}", other),
        }
        assert!(matches!(&lines[2], PendingLine::Malformed { raw, .. } if raw == "not json"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(read_pending(&tmp.path().join("none.txt")).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_reset() {
        let tmp = TempDir::new().unwrap();
        let pending = tmp.path().join("pending_queries.txt");
        let processed = tmp.path().join("processed_queries.txt");

        std::fs::write(&pending, "{\"vector\": [1.0]}\n").unwrap();
        let entry = ProcessedEntry {
            query: serde_json::json!({"vector": [1.0]}),
            status: ProcessedStatus::Processed,
            results: Some(serde_json::json!(["a"])),
            error: None,
        };
        append_processed(&processed, &[entry.clone()]).unwrap();
        append_processed(&processed, &[entry]).unwrap();
        reset_pending(&pending).unwrap();

        let written = std::fs::read_to_string(&processed).unwrap();
        assert_eq!(written.lines().count(), 2);
        assert!(written.lines().all(|l| l.contains("\"status\":\"processed\"")));
        assert!(!written.contains("\"error\""));
        assert_eq!(std::fs::read_to_string(&pending).unwrap(), "# Processed queries\n");
        assert!(read_pending(&pending).unwrap().is_empty());
    }
}
