use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::expr::ElementKind;

/// Reduces a projected row sequence to the shape the query asked for.
pub struct Aggregator;

impl Aggregator {
    /// No element operator keeps the whole sequence as an array.
    pub fn apply(kind: Option<ElementKind>, mut values: Vec<Value>) -> Result<Value> {
        let Some(kind) = kind else {
            return Ok(Value::Array(values));
        };
        let n = values.len();
        match kind {
            ElementKind::First | ElementKind::FirstOrDefault => match values.into_iter().next() {
                Some(v) => Ok(v),
                None if kind.or_default() => Ok(Value::Null),
                None => Err(QueryError::cardinality("First on an empty sequence")),
            },
            ElementKind::Last | ElementKind::LastOrDefault => match values.pop() {
                Some(v) => Ok(v),
                None if kind.or_default() => Ok(Value::Null),
                None => Err(QueryError::cardinality("Last on an empty sequence")),
            },
            ElementKind::Single | ElementKind::SingleOrDefault => match n {
                1 => Ok(values.remove(0)),
                0 if kind.or_default() => Ok(Value::Null),
                0 => Err(QueryError::cardinality("Single on an empty sequence")),
                _ => Err(QueryError::cardinality(format!("{} expected one row but got {n}", kind.name()))),
            },
        }
    }
}
