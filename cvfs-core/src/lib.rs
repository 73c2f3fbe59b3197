//! # CVFS Core
//!
//! Building blocks shared by every CVFS crate:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    cvfs-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • types   - VectorRecord, metadata, id rules   │
//! │  • error   - Error taxonomy and Result alias    │
//! │  • config  - Storage / index / daemon config    │
//! │  • oplog   - Append-only operation log sink     │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod oplog;
pub mod types;

// Re-export commonly used types
pub use config::{Config, DaemonConfig, HnswConfig, IndexConfig, IvfConfig, PqConfig, StorageConfig};
pub use error::{Error, Result, ResultExt};
pub use oplog::{FileOperationLog, MemoryOperationLog, OperationLog, SharedOperationLog};
pub use types::{is_ephemeral_id, validate_id, Metadata, Timestamp, VectorRecord, EPHEMERAL_PREFIXES};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
