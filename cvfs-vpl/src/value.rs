//! Runtime values.
//!
//! Closed set: a vector id, a number, or a list of values. A vector itself is
//! a list of scalars (what `GATHER` returns), so built-ins that take a vector
//! accept either an id or such a list.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VplError, VplResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VplValue {
    Id(String),
    Scalar(f64),
    List(Vec<VplValue>),
}

impl VplValue {
    pub fn empty_list() -> Self {
        VplValue::List(Vec::new())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            VplValue::Id(_) => "id",
            VplValue::Scalar(_) => "scalar",
            VplValue::List(_) => "list",
        }
    }

    pub fn as_id(&self) -> VplResult<&str> {
        match self {
            VplValue::Id(id) => Ok(id),
            other => Err(VplError::Type {
                expected: "id",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_scalar(&self) -> VplResult<f64> {
        match self {
            VplValue::Scalar(x) => Ok(*x),
            other => Err(VplError::Type {
                expected: "scalar",
                found: other.type_name(),
            }),
        }
    }

    pub fn as_list(&self) -> VplResult<&[VplValue]> {
        match self {
            VplValue::List(items) => Ok(items),
            other => Err(VplError::Type {
                expected: "list",
                found: other.type_name(),
            }),
        }
    }

    /// Non-negative integral scalar, e.g. a list index or `k`
    pub fn as_count(&self) -> VplResult<usize> {
        let x = self.as_scalar()?;
        if x < 0.0 || x.fract() != 0.0 || !x.is_finite() {
            return Err(VplError::syntax(format!("expected a non-negative integer, got {}", x)));
        }
        Ok(x as usize)
    }

    /// A list made only of scalars, read as a raw vector
    pub fn as_vector(&self) -> Option<Vec<f64>> {
        match self {
            VplValue::List(items) => items
                .iter()
                .map(|v| match v {
                    VplValue::Scalar(x) => Some(*x),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn from_vector(vector: &[f64]) -> Self {
        VplValue::List(vector.iter().copied().map(VplValue::Scalar).collect())
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VplValue::List(ids.into_iter().map(|s| VplValue::Id(s.into())).collect())
    }

    /// Number of result items: a list's length, 1 for anything else
    pub fn result_count(&self) -> usize {
        match self {
            VplValue::List(items) => items.len(),
            _ => 1,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            VplValue::Id(id) => Value::String(id.clone()),
            VplValue::Scalar(x) => serde_json::json!(x),
            VplValue::List(items) => Value::Array(items.iter().map(VplValue::to_json).collect()),
        }
    }
}

impl fmt::Display for VplValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VplValue::Id(id) => write!(f, "\"{}\"", id),
            VplValue::Scalar(x) => write!(f, "{}", x),
            VplValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for VplValue {
    fn from(s: &str) -> Self {
        VplValue::Id(s.to_string())
    }
}

impl From<f64> for VplValue {
    fn from(x: f64) -> Self {
        VplValue::Scalar(x)
    }
}
