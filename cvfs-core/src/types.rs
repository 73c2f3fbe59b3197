//! # Core Types
//!
//! Records owned by the vector store and the helpers that classify their ids.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Timestamp type used throughout the system
pub type Timestamp = DateTime<Utc>;

/// String-keyed map of JSON-like scalars attached to a vector
pub type Metadata = Map<String, Value>;

/// Id prefixes of scratch vectors created by distance computations and queries.
/// The daemon purges these on every optimization cycle.
pub const EPHEMERAL_PREFIXES: [&str; 3] = ["temp_", "dist_", "query_"];

/// A stored vector with its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f64>,
    pub metadata: Metadata,
    pub created_at: Timestamp,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, vector: Vec<f64>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn is_ephemeral(&self) -> bool {
        is_ephemeral_id(&self.id)
    }
}

/// Whether `id` names a scratch vector
pub fn is_ephemeral_id(id: &str) -> bool {
    EPHEMERAL_PREFIXES.iter().any(|p| id.starts_with(p))
}

/// Ids end up inside `|`-delimited lines, comma-separated neighbor lists and
/// quoted VPL literals.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid("vector id must not be empty"));
    }
    if id.contains(['|', ',', '"', '\n', '\r']) {
        return Err(Error::invalid(format!(
            "vector id {:?} contains a reserved character",
            id
        )));
    }
    Ok(())
}

/// Creation time assigned to records persisted without one
pub fn epoch() -> Timestamp {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_prefixes() {
        assert!(is_ephemeral_id("temp_42"));
        assert!(is_ephemeral_id("dist_1_0"));
        assert!(is_ephemeral_id("query_1700000000_3"));
        assert!(!is_ephemeral_id("doc_1"));
        assert!(!is_ephemeral_id("my_query_1"));
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("vec_1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("a|b").is_err());
        assert!(validate_id("a\"b").is_err());
        assert!(validate_id("a\nb").is_err());
        assert!(validate_id("a,b").is_err());
    }

    #[test]
    fn test_record_dimension() {
        let record = VectorRecord::new("a", vec![1.0, 2.0, 3.0], Metadata::new());
        assert_eq!(record.dimension(), 3);
        assert!(!record.is_ephemeral());
    }
}
