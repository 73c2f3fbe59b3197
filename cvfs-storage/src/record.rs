//! # Record Line Codec
//!
//! ```text
//! <id>|<json array of floats>|<json metadata object>[|<RFC 3339 created_at>]
//! <id>|null|{}                                        (tombstone)
//! ```
//!
//! Lines without the trailing timestamp load with `created_at` at the Unix
//! epoch. Metadata is parsed with a streaming deserializer, so `|` inside
//! metadata strings is fine.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use cvfs_core::error::{Error, Result};
use cvfs_core::types::{epoch, Metadata, VectorRecord};

/// First line of every vector log
pub const HEADER: &str = "# CVFS vector store: id|vector|metadata|created_at";

/// One decoded log line
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Put(VectorRecord),
    Delete(String),
}

impl LogEntry {
    pub fn id(&self) -> &str {
        match self {
            LogEntry::Put(record) => &record.id,
            LogEntry::Delete(id) => id,
        }
    }
}

/// Encode a live record (no trailing newline)
pub fn encode_put(record: &VectorRecord) -> Result<String> {
    let vector = serde_json::to_string(&record.vector)?;
    let metadata = serde_json::to_string(&record.metadata)?;
    Ok(format!(
        "{}|{}|{}|{}",
        record.id,
        vector,
        metadata,
        record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    ))
}

/// Encode a deletion marker
pub fn encode_tombstone(id: &str) -> String {
    format!("{}|null|{{}}", id)
}

/// Decode one non-comment line. `line_no` is 1-based and only used in errors.
pub fn parse_line(line: &str, line_no: usize) -> Result<LogEntry> {
    let corrupted = |reason: String| Error::CorruptedRecordLine { line: line_no, reason };

    let (id, rest) = line
        .split_once('|')
        .ok_or_else(|| corrupted("missing '|' after id".to_string()))?;
    if id.is_empty() {
        return Err(corrupted("empty id".to_string()));
    }

    let (vector_json, rest) = rest
        .split_once('|')
        .ok_or_else(|| corrupted("missing metadata field".to_string()))?;
    let vector: Option<Vec<f64>> =
        serde_json::from_str(vector_json).map_err(|e| corrupted(format!("vector: {}", e)))?;

    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Map<String, Value>>();
    let metadata: Metadata = match stream.next() {
        Some(Ok(map)) => map,
        Some(Err(e)) => return Err(corrupted(format!("metadata: {}", e))),
        None => return Err(corrupted("missing metadata object".to_string())),
    };
    let trailer = rest[stream.byte_offset()..].trim();

    let created_at = if trailer.is_empty() {
        epoch()
    } else {
        let ts = trailer
            .strip_prefix('|')
            .ok_or_else(|| corrupted(format!("unexpected trailing data {:?}", trailer)))?;
        DateTime::parse_from_rfc3339(ts.trim())
            .map_err(|e| corrupted(format!("created_at: {}", e)))?
            .with_timezone(&Utc)
    };

    Ok(match vector {
        None => LogEntry::Delete(id.to_string()),
        Some(vector) => LogEntry::Put(VectorRecord {
            id: id.to_string(),
            vector,
            metadata,
            created_at,
        }),
    })
}
