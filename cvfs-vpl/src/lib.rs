//! # VPL
//!
//! A small indentation-delimited language for scripting multi-step vector
//! queries against a CVFS engine:
//!
//! ```text
//! query = LOAD("$query_id")
//! neighbors = HNSW_STEP(query, ef=50)
//! distances = []
//! FOR i IN RANGE(LEN(neighbors)):
//!     distances.append(L2(query, neighbors[i]))
//! RETURN TOP_K(neighbors, distances, k=$top_k)
//! ```
//!
//! Pipeline: `lexer` (one line at a time) -> `parser` (indentation blocks,
//! per-line error recovery) -> `interpreter`, whose built-ins call back into
//! the engine through [`VplHost`].

pub mod ast;
pub mod builtins;
pub mod error;
pub mod host;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use error::{VplError, VplResult};
pub use host::VplHost;
pub use interpreter::{substitute, Interpreter, RunOutcome};
pub use parser::parse;
pub use value::VplValue;
