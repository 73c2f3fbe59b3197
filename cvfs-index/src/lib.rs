//! # CVFS Vector Index
//!
//! Distance primitives and the approximate indexes derived from the store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vector Index Layer                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐     │
//! │  │   HNSW   │  │   IVF    │  │    PQ    │  │   Flat   │     │
//! │  │ 2 layers │  │ k parts  │  │ codebook │  │ (exact)  │     │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘     │
//! │        │             │             │             │          │
//! │        └─────────────┴──────┬──────┴─────────────┘          │
//! │                             │                               │
//! │                  distance (cosine, L2)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every index is derived state: rebuildable from the store and persisted as
//! a small text side file that stores ids only. Loading resolves vectors back
//! through [`VectorSource`].
//!
//! ## Modules
//!
//! - `distance`: cosine similarity, squared L2, dot product
//! - `traits`: search results and the vector source seam
//! - `flat`: streaming brute-force search (ground truth)
//! - `hnsw`: two-layer proximity graph
//! - `ivf`: first-k centroid partitions
//! - `pq`: product quantization codebooks

pub mod distance;
pub mod flat;
pub mod hnsw;
pub mod ivf;
mod line_file;
pub mod pq;
pub mod traits;

pub use distance::{cosine_similarity, dot_product, l2_distance, norm, squared_l2};
pub use hnsw::{GraphLine, HnswIndex, LAYER_BASE, LAYER_HIGHWAY};
pub use ivf::IvfIndex;
pub use pq::{PqCodebook, PqCodebooks};
pub use traits::{SearchResult, VectorSource};
