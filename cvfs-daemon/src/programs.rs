//! VPL program library.
//!
//! Templates live as `<name>.vpl` files under `<data_dir>/programs`. The
//! defaults are written there on first start; the directory is read once at
//! start-up, so edits take effect on the next restart.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use cvfs_core::{Error, Result};

pub const SEMANTIC_SEARCH: &str = "semantic_search";
pub const CONCEPT_CLUSTER: &str = "concept_cluster";
pub const HYBRID_SEARCH: &str = "hybrid_search";

const SEMANTIC_SEARCH_VPL: &str = r#"# Semantic search: graph neighbors re-ranked by exact distance
query = LOAD("$query_id")
neighbors = HNSW_STEP(query, ef=50)
distances = []
FOR i IN RANGE(LEN(neighbors)):
    distances.append(L2(query, neighbors[i]))
RETURN TOP_K(neighbors, distances, k=$top_k)
"#;

const CONCEPT_CLUSTER_VPL: &str = r#"# Concept cluster: members of the partition closest to the query
query = LOAD("$query_id")
centroid = IVF_NEAREST(query)
RETURN IVF_MEMBERS(centroid)
"#;

const HYBRID_SEARCH_VPL: &str = r#"# Hybrid search: graph neighbors filtered on metadata
query = LOAD("$query_id")
candidates = HNSW_STEP(query, ef=50)
filtered = FILTER_BY_METADATA(candidates, "$filter")
distances = []
FOR i IN RANGE(LEN(filtered)):
    distances.append(L2(query, filtered[i]))
RETURN TOP_K(filtered, distances, k=$top_k)
"#;

const DEFAULTS: [(&str, &str); 3] = [
    (SEMANTIC_SEARCH, SEMANTIC_SEARCH_VPL),
    (CONCEPT_CLUSTER, CONCEPT_CLUSTER_VPL),
    (HYBRID_SEARCH, HYBRID_SEARCH_VPL),
];

#[derive(Debug, Clone)]
pub struct ProgramLibrary {
    programs: BTreeMap<String, String>,
}

impl ProgramLibrary {
    /// The built-in templates only
    pub fn defaults() -> Self {
        Self {
            programs: DEFAULTS
                .iter()
                .map(|(name, source)| (name.to_string(), source.to_string()))
                .collect(),
        }
    }

    /// Write any missing default into `dir`, then load every `.vpl` file there
    pub fn load_or_init(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| Error::Io {
            message: format!("Failed to create programs directory {:?}", dir),
            source: e,
        })?;

        for (name, source) in DEFAULTS {
            let path = dir.join(format!("{}.vpl", name));
            if !path.exists() {
                std::fs::write(&path, source)?;
                debug!("Wrote default program {:?}", path);
            }
        }

        let mut programs = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("vpl") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!("Skipping program with a non UTF-8 name: {:?}", path);
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    programs.insert(name.to_string(), source);
                }
                Err(e) => warn!("Skipping unreadable program {:?}: {}", path, e),
            }
        }

        info!("Loaded {} VPL programs from {:?}", programs.len(), dir);
        Ok(Self { programs })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.programs.get(name).map(String::as_str)
    }

    /// Template for `query_type`; unknown types fall back to semantic search
    pub fn resolve(&self, query_type: &str) -> &str {
        self.get(query_type)
            .or_else(|| {
                warn!("Unknown query type {:?}, using {}", query_type, SEMANTIC_SEARCH);
                self.get(SEMANTIC_SEARCH)
            })
            .unwrap_or(SEMANTIC_SEARCH_VPL)
    }

    pub fn names(&self) -> Vec<&str> {
        self.programs.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
