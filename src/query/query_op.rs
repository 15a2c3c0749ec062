use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{QueryError, Result};
use crate::expr::{AggregateKind, ElementKind, ExprRef, OrderType};

static NEXT_PARAMETER: AtomicU64 = AtomicU64::new(1);

/// A lambda parameter. Identity is the id; the name is only for display.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub id: u64,
    pub name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: NEXT_PARAMETER.fetch_add(1, Ordering::Relaxed), name: name.into() }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Parameter {}

impl std::hash::Hash for Parameter {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<Parameter>,
    pub body: ExprRef,
}

impl Lambda {
    pub fn new(params: Vec<Parameter>, body: ExprRef) -> Self {
        Self { params, body }
    }

    pub fn param(&self, index: usize) -> Result<&Parameter> {
        self.params
            .get(index)
            .ok_or_else(|| QueryError::internal(format!("lambda has no parameter #{index}")))
    }
}

/// LINQ-shaped sequence operators. `source` is always another query
/// expression (or, for nested queries, an association member).
#[derive(Debug, Clone)]
pub enum QueryOp {
    Source { entity: String },
    Where { source: ExprRef, predicate: Lambda },
    Select { source: ExprRef, selector: Lambda },
    SelectMany { source: ExprRef, collection: Lambda, result: Option<Lambda> },
    Join { outer: ExprRef, inner: ExprRef, outer_key: Lambda, inner_key: Lambda, result: Lambda },
    GroupBy { source: ExprRef, key: Lambda, element: Option<Lambda> },
    OrderBy { source: ExprRef, key: Lambda, order_type: OrderType, then: bool },
    Distinct { source: ExprRef },
    Reverse { source: ExprRef },
    Skip { source: ExprRef, count: ExprRef },
    Take { source: ExprRef, count: ExprRef },
    Element { source: ExprRef, kind: ElementKind, predicate: Option<Lambda> },
    Aggregate { source: ExprRef, kind: AggregateKind, selector: Option<Lambda> },
    Any { source: ExprRef, predicate: Option<Lambda> },
    All { source: ExprRef, predicate: Lambda },
    Contains { source: ExprRef, item: ExprRef },
}

impl QueryOp {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Source { .. } => "Source",
            QueryOp::Where { .. } => "Where",
            QueryOp::Select { .. } => "Select",
            QueryOp::SelectMany { .. } => "SelectMany",
            QueryOp::Join { .. } => "Join",
            QueryOp::GroupBy { .. } => "GroupBy",
            QueryOp::OrderBy { then: false, .. } => "OrderBy",
            QueryOp::OrderBy { then: true, .. } => "ThenBy",
            QueryOp::Distinct { .. } => "Distinct",
            QueryOp::Reverse { .. } => "Reverse",
            QueryOp::Skip { .. } => "Skip",
            QueryOp::Take { .. } => "Take",
            QueryOp::Element { kind, .. } => kind.name(),
            QueryOp::Aggregate { .. } => "Aggregate",
            QueryOp::Any { .. } => "Any",
            QueryOp::All { .. } => "All",
            QueryOp::Contains { .. } => "Contains",
        }
    }

    pub fn children(&self) -> Vec<&ExprRef> {
        fn lambda(l: &Option<Lambda>) -> Option<&ExprRef> {
            l.as_ref().map(|l| &l.body)
        }
        let mut out = Vec::new();
        match self {
            QueryOp::Source { .. } => {}
            QueryOp::Where { source, predicate } => {
                out.push(source);
                out.push(&predicate.body);
            }
            QueryOp::Select { source, selector } => {
                out.push(source);
                out.push(&selector.body);
            }
            QueryOp::SelectMany { source, collection, result } => {
                out.push(source);
                out.push(&collection.body);
                out.extend(lambda(result));
            }
            QueryOp::Join { outer, inner, outer_key, inner_key, result } => {
                out.push(outer);
                out.push(inner);
                out.push(&outer_key.body);
                out.push(&inner_key.body);
                out.push(&result.body);
            }
            QueryOp::GroupBy { source, key, element } => {
                out.push(source);
                out.push(&key.body);
                out.extend(lambda(element));
            }
            QueryOp::OrderBy { source, key, .. } => {
                out.push(source);
                out.push(&key.body);
            }
            QueryOp::Distinct { source } | QueryOp::Reverse { source } => out.push(source),
            QueryOp::Skip { source, count } | QueryOp::Take { source, count } => {
                out.push(source);
                out.push(count);
            }
            QueryOp::Element { source, predicate, .. } | QueryOp::Any { source, predicate } => {
                out.push(source);
                out.extend(lambda(predicate));
            }
            QueryOp::Aggregate { source, selector, .. } => {
                out.push(source);
                out.extend(lambda(selector));
            }
            QueryOp::All { source, predicate } => {
                out.push(source);
                out.push(&predicate.body);
            }
            QueryOp::Contains { source, item } => {
                out.push(source);
                out.push(item);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_compare_by_identity_not_name() {
        let a = Parameter::new("x");
        let b = Parameter::new("x");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn lambda_reports_missing_parameter() {
        let l = Lambda::new(vec![], crate::expr::Expr::constant(1));
        assert!(l.param(0).is_err());
    }
}
