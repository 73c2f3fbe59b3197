//! Built-in functions.
//!
//! Every call that touches vectors appends one line to the operation log
//! through the host, using the instruction names of the original vector ISA
//! (`V-L2-REDUCE`, `V-FMA-COS`, `V-HNSW-STEP`, ...).

use std::collections::HashMap;

use cvfs_core::{Error, Metadata};
use cvfs_index::{cosine_similarity, squared_l2};
use serde_json::Value;
use tracing::debug;

use crate::error::{VplError, VplResult};
use crate::host::VplHost;
use crate::value::VplValue;

/// Candidate list size when a call does not pass `ef`
pub const DEFAULT_EF: usize = 50;

/// Codebook consulted by `PQ_DIST` when no name is given
pub const DEFAULT_CODEBOOK: &str = "default";

/// Largest list `RANGE` will build
pub const MAX_RANGE: usize = 10_000_000;

pub const BUILTINS: &[&str] = &[
    "LOAD",
    "LOAD_ALL",
    "HNSW_STEP",
    "GATHER",
    "L2",
    "COSINE",
    "LEN",
    "RANGE",
    "TOP_K",
    "FILTER_BY_METADATA",
    "IVF_NEAREST",
    "IVF_MEMBERS",
    "PQ_DIST",
];

/// Evaluated arguments of one call
pub(crate) struct CallArgs {
    function: &'static str,
    positional: Vec<VplValue>,
    named: HashMap<String, VplValue>,
}

impl CallArgs {
    pub(crate) fn new(function: &'static str) -> Self {
        Self {
            function,
            positional: Vec::new(),
            named: HashMap::new(),
        }
    }

    pub(crate) fn push(&mut self, name: Option<String>, value: VplValue) -> VplResult<()> {
        match name {
            Some(name) => {
                if self.named.contains_key(&name) {
                    return Err(VplError::bad_arg(self.function, format!("argument {} given twice", name)));
                }
                self.named.insert(name, value);
            }
            None => {
                if !self.named.is_empty() {
                    return Err(VplError::bad_arg(
                        self.function,
                        "positional argument after keyword argument",
                    ));
                }
                self.positional.push(value);
            }
        }
        Ok(())
    }

    /// Argument at `index`, or passed as `name=`
    fn get(&self, index: usize, name: &str) -> Option<&VplValue> {
        self.positional.get(index).or_else(|| self.named.get(name))
    }

    fn required(&self, index: usize, name: &str) -> VplResult<&VplValue> {
        self.get(index, name)
            .ok_or_else(|| VplError::bad_arg(self.function, format!("missing argument {}", name)))
    }

    fn count_or(&self, index: usize, names: &[&str], default: usize) -> VplResult<usize> {
        let value = names
            .iter()
            .enumerate()
            .find_map(|(i, n)| if i == 0 { self.get(index, n) } else { self.named.get(*n) });
        match value {
            Some(v) => v.as_count(),
            None => Ok(default),
        }
    }

    /// Reject arity and keyword mistakes up front
    fn check(&self, max_positional: usize, keywords: &[&str]) -> VplResult<()> {
        if self.positional.len() > max_positional {
            return Err(VplError::bad_arg(
                self.function,
                format!(
                    "takes at most {} positional arguments, got {}",
                    max_positional,
                    self.positional.len()
                ),
            ));
        }
        if let Some(unknown) = self.named.keys().find(|k| !keywords.contains(&k.as_str())) {
            return Err(VplError::bad_arg(self.function, format!("unknown argument {}", unknown)));
        }
        Ok(())
    }
}

pub(crate) fn lookup(name: &str) -> Option<&'static str> {
    BUILTINS.iter().copied().find(|b| *b == name)
}

pub(crate) fn call(host: &dyn VplHost, args: CallArgs) -> VplResult<VplValue> {
    match args.function {
        "LOAD" => load(host, &args),
        "LOAD_ALL" => load_all(host, &args),
        "HNSW_STEP" => hnsw_step(host, &args),
        "GATHER" => gather(host, &args),
        "L2" => l2(host, &args),
        "COSINE" => cosine(host, &args),
        "LEN" => len(&args),
        "RANGE" => range(&args),
        "TOP_K" => top_k_call(&args),
        "FILTER_BY_METADATA" => filter_by_metadata(host, &args),
        "IVF_NEAREST" => ivf_nearest(host, &args),
        "IVF_MEMBERS" => ivf_members(host, &args),
        "PQ_DIST" => pq_dist(host, &args),
        other => Err(VplError::UnknownFunction(other.to_string())),
    }
}

/// A vector operand: a stored id or a literal list of scalars
struct Operand {
    label: String,
    id: Option<String>,
    vector: Vec<f64>,
}

fn resolve(host: &dyn VplHost, value: &VplValue) -> VplResult<Operand> {
    match value {
        VplValue::Id(id) => {
            let record = host
                .record(id)?
                .ok_or_else(|| Error::VectorNotFound { id: id.clone() })?;
            Ok(Operand {
                label: id.clone(),
                id: Some(id.clone()),
                vector: record.vector,
            })
        }
        other => {
            let vector = other.as_vector().ok_or(VplError::Type {
                expected: "vector id or list of numbers",
                found: other.type_name(),
            })?;
            Ok(Operand {
                label: format!("<vector/{}>", vector.len()),
                id: None,
                vector,
            })
        }
    }
}

fn load(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &["id"])?;
    let id = args.required(0, "id")?.as_id()?;
    if host.record(id)?.is_none() {
        return Err(Error::VectorNotFound { id: id.to_string() }.into());
    }
    host.record_operation(&format!("V-LOAD {}", id));
    Ok(VplValue::Id(id.to_string()))
}

fn load_all(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(0, &[])?;
    let ids = host.all_ids()?;
    host.record_operation(&format!("V-LOAD-ALL loaded {} ids", ids.len()));
    Ok(VplValue::from_ids(ids))
}

fn hnsw_step(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &["query", "ef", "k", "m"])?;
    let query = resolve(host, args.required(0, "query")?)?;
    let ef = args.count_or(usize::MAX, &["ef"], DEFAULT_EF)?.max(1);
    let limit = args.count_or(usize::MAX, &["k", "m"], ef)?;

    // The query itself may be in the graph; ask for one extra so excluding it
    // still leaves `limit` results.
    let wanted = ef.max(limit.saturating_add(1));
    let (results, source) = match host.hnsw_search(&query.vector, wanted) {
        Ok(results) => (results, "graph"),
        Err(Error::IndexNotBuilt { .. }) => {
            debug!("HNSW_STEP without a graph, scanning all vectors");
            (host.exact_search(&query.vector, wanted)?, "brute force")
        }
        Err(e) => return Err(e.into()),
    };

    let neighbors: Vec<String> = results
        .into_iter()
        .filter(|r| query.id.as_deref() != Some(r.id.as_str()))
        .take(limit)
        .map(|r| r.id)
        .collect();

    host.record_operation(&format!(
        "V-HNSW-STEP {} ef={}, found {} neighbors ({})",
        query.label,
        ef,
        neighbors.len(),
        source
    ));
    Ok(VplValue::from_ids(neighbors))
}

fn gather(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &["ids"])?;
    let ids = args.required(0, "ids")?.as_list()?;

    let mut gathered = Vec::with_capacity(ids.len());
    for item in ids {
        let id = item.as_id()?;
        if let Some(record) = host.record(id)? {
            gathered.push(VplValue::from_vector(&record.vector));
        }
    }
    host.record_operation(&format!("V-GATHER-VEC gathered {} vectors", gathered.len()));
    Ok(VplValue::List(gathered))
}

fn pair(host: &dyn VplHost, args: &CallArgs) -> VplResult<(Operand, Operand)> {
    args.check(2, &["a", "b"])?;
    let a = resolve(host, args.required(0, "a")?)?;
    let b = resolve(host, args.required(1, "b")?)?;
    Ok((a, b))
}

fn l2(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    let (a, b) = pair(host, args)?;
    let d = squared_l2(&a.vector, &b.vector)?;
    host.record_operation(&format!("V-L2-REDUCE L2({}, {}) = {}", a.label, b.label, d));
    Ok(VplValue::Scalar(d))
}

fn cosine(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    let (a, b) = pair(host, args)?;
    let s = cosine_similarity(&a.vector, &b.vector)?;
    host.record_operation(&format!("V-FMA-COS COSINE({}, {}) = {}", a.label, b.label, s));
    Ok(VplValue::Scalar(s))
}

fn len(args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &[])?;
    let items = args.required(0, "x")?.as_list()?;
    Ok(VplValue::Scalar(items.len() as f64))
}

fn range(args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &[])?;
    let n = args.required(0, "n")?.as_count()?;
    if n > MAX_RANGE {
        return Err(VplError::bad_arg("RANGE", format!("{} exceeds the limit of {}", n, MAX_RANGE)));
    }
    Ok(VplValue::List((0..n).map(|i| VplValue::Scalar(i as f64)).collect()))
}

fn top_k_call(args: &CallArgs) -> VplResult<VplValue> {
    args.check(3, &["ids", "distances", "k"])?;
    let items = args.required(0, "ids")?.as_list()?;
    let distances = args
        .required(1, "distances")?
        .as_list()?
        .iter()
        .map(VplValue::as_scalar)
        .collect::<VplResult<Vec<f64>>>()?;
    let k = args.required(2, "k")?.as_count()?;

    if items.len() != distances.len() {
        return Err(VplError::bad_arg(
            "TOP_K",
            format!("{} items but {} distances", items.len(), distances.len()),
        ));
    }
    Ok(VplValue::List(top_k(items, &distances, k)))
}

/// The `k` items with the smallest distances, ascending; equal distances keep
/// their input order
pub(crate) fn top_k(items: &[VplValue], distances: &[f64], k: usize) -> Vec<VplValue> {
    let mut order: Vec<usize> = (0..items.len().min(distances.len())).collect();
    order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]));
    order.into_iter().take(k).map(|i| items[i].clone()).collect()
}

fn filter_by_metadata(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(2, &["ids", "filter"])?;
    let ids = args.required(0, "ids")?.as_list()?;
    let filter = parse_filter(args.get(1, "filter").map(VplValue::as_id).transpose()?.unwrap_or(""))?;

    let mut kept = Vec::new();
    for item in ids {
        let id = item.as_id()?;
        if let Some(record) = host.record(id)? {
            if metadata_matches(&record.metadata, &filter) {
                kept.push(id.to_string());
            }
        }
    }
    host.record_operation(&format!(
        "V-FILTER-META kept {} of {} ids",
        kept.len(),
        ids.len()
    ));
    Ok(VplValue::from_ids(kept))
}

/// An empty string or `{}` matches everything
pub(crate) fn parse_filter(raw: &str) -> VplResult<Metadata> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Metadata::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(VplError::bad_arg(
            "FILTER_BY_METADATA",
            format!("filter must be a JSON object, got {}", other),
        )),
        Err(e) => Err(VplError::bad_arg("FILTER_BY_METADATA", format!("invalid filter JSON: {}", e))),
    }
}

/// Every filter key must be present with an equal value
pub(crate) fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter.iter().all(|(k, v)| metadata.get(k) == Some(v))
}

fn ivf_nearest(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &["query"])?;
    let query = resolve(host, args.required(0, "query")?)?;
    let nearest = host.ivf_nearest(&query.vector)?;
    host.record_operation(&format!(
        "V-IVF-PROBE {} -> {} ({})",
        query.label, nearest.id, nearest.distance
    ));
    Ok(VplValue::Id(nearest.id))
}

fn ivf_members(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(1, &["centroid"])?;
    let centroid = args.required(0, "centroid")?.as_id()?;
    let members = host.ivf_members(centroid)?;
    host.record_operation(&format!("V-IVF-SCAN {} has {} members", centroid, members.len()));
    Ok(VplValue::from_ids(members))
}

fn pq_dist(host: &dyn VplHost, args: &CallArgs) -> VplResult<VplValue> {
    args.check(2, &["query", "name"])?;
    let query = resolve(host, args.required(0, "query")?)?;
    let name = match args.get(1, "name") {
        Some(v) => v.as_id()?.to_string(),
        None => DEFAULT_CODEBOOK.to_string(),
    };
    let (total, codes) = host.pq_distance(&name, &query.vector)?;
    host.record_operation(&format!(
        "V-PQ-LOOKUP {} codebook={} codes={:?} = {}",
        query.label, name, codes, total
    ));
    Ok(VplValue::Scalar(total))
}
