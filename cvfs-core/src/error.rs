//! # Error Handling
//!
//! Error taxonomy shared by every CVFS crate.
//!
//! ## Propagation
//!
//! Storage and index layers return these errors to the daemon, which decides
//! what happens next:
//!
//! - `IndexNotBuilt`   -> fall back to a brute-force scan
//! - `CodebookMissing` -> build the codebook, then retry once
//! - `DimensionMismatch` and everything else -> surface to the caller
//!
//! `VectorNotFound` is mostly expressed as `Option::None` / `false` by the store
//! itself; the variant exists for call sites (VPL built-ins) that need an id to
//! resolve.

use thiserror::Error;

/// Result type alias for CVFS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for CVFS
#[derive(Error, Debug)]
pub enum Error {
    // Vector math
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Store
    #[error("Vector not found: {id}")]
    VectorNotFound { id: String },

    #[error("Corrupted record at line {line}: {reason}")]
    CorruptedRecordLine { line: usize, reason: String },

    // Indexes
    #[error("Index not built: {index}")]
    IndexNotBuilt { index: &'static str },

    #[error("Codebook missing: {name}")]
    CodebookMissing { name: String },

    // Interpreter
    #[error("VPL statement error at line {line}: {message}")]
    VplStatement { line: usize, message: String },

    // Caller input
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    // System
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for `DimensionMismatch`
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Error::DimensionMismatch { expected, actual }
    }

    /// Shorthand for `InvalidParameter`
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidParameter { message: message.into() }
    }

    /// Whether the daemon can recover from this error without surfacing it
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::IndexNotBuilt { .. } => true,
            Error::CodebookMissing { .. } => true,
            Error::CorruptedRecordLine { .. } => true,
            Error::VplStatement { .. } => true,
            Error::VectorNotFound { .. } => true,
            Error::DimensionMismatch { .. } => false,
            Error::Io { .. } => false,
            _ => false,
        }
    }

    /// Stable error kind, attached to failed query responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Error::VectorNotFound { .. } => "VECTOR_NOT_FOUND",
            Error::CorruptedRecordLine { .. } => "CORRUPTED_RECORD_LINE",
            Error::IndexNotBuilt { .. } => "INDEX_NOT_BUILT",
            Error::CodebookMissing { .. } => "CODEBOOK_MISSING",
            Error::VplStatement { .. } => "VPL_STATEMENT_ERROR",
            Error::InvalidParameter { .. } => "INVALID_PARAMETER",
            Error::Io { .. } => "IO_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            message: err.to_string(),
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e {
            Error::Io { message, source } => Error::Io {
                message: format!("{}: {}", f(), message),
                source,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::dimension_mismatch(2, 3).error_code(), "DIMENSION_MISMATCH");
        assert_eq!(
            Error::CodebookMissing { name: "default".into() }.error_code(),
            "CODEBOOK_MISSING"
        );
        assert_eq!(Error::IndexNotBuilt { index: "hnsw" }.error_code(), "INDEX_NOT_BUILT");
    }

    #[test]
    fn test_recoverability() {
        assert!(Error::IndexNotBuilt { index: "hnsw" }.is_recoverable());
        assert!(Error::CodebookMissing { name: "x".into() }.is_recoverable());
        assert!(!Error::dimension_mismatch(4, 8).is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::dimension_mismatch(4, 8);
        assert_eq!(err.to_string(), "Dimension mismatch: expected 4, got 8");
    }

    #[test]
    fn test_io_context_is_prefixed() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let res: Result<()> = Err(io.into());
        let err = res.with_context(|| "opening vectors.txt".to_string()).unwrap_err();
        assert!(err.to_string().contains("opening vectors.txt"));
    }
}
