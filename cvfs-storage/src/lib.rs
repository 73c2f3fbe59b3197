//! # CVFS Storage
//!
//! Append-only vector log with last-write-wins reads.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  put / delete ──> encode line ──> append to vectors.txt     │
//! │                                        │                    │
//! │                                        ▼                    │
//! │                              index: id -> line offset       │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  get  ──> index lookup ──> seek + decode one line           │
//! │  scan ──> stream file, keep lines the index points at       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Compaction rewrites the log from its live records during the daemon's
//! optimization cycle.

pub mod compaction;
pub mod record;
pub mod vector_store;

pub use compaction::CompactionStats;
pub use record::LogEntry;
pub use vector_store::{Scan, StoreStats, VectorStore};
