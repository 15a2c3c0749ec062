use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::execution::{Aggregator, Eval, Helpers, Row};
use crate::expr::{ElementKind, ExprRef, TableAlias};

/// Per-row shaping compiled from a projection's projector.
#[derive(Debug, Clone)]
pub enum Projector {
    /// Column of the row being projected.
    Column(String),
    /// Column of the enclosing row, for nested per-row queries.
    Outer(String),
    Constant(Value),
    Record(Vec<(String, Projector)>),
    /// Null whenever the outer-join test column came back null.
    OuterJoined { test: Box<Projector>, expr: Box<Projector> },
    Grouping { key: Box<Projector>, elements: Box<Projector> },
    /// Scalar computed on the client; columns of `alias` read from the row.
    Eval { expr: ExprRef, alias: TableAlias },
    /// Result of the n-th nested query run for this row.
    Nested(usize),
    /// Related rows fetched by the n-th client join, matched on the key.
    ClientJoin { index: usize, outer_key: Vec<Projector> },
}

/// Related values of one client join, grouped by inner key in fetch order.
#[derive(Debug, Default)]
pub struct ClientJoinLookup {
    groups: HashMap<String, Vec<Value>>,
    aggregator: Option<ElementKind>,
}

impl ClientJoinLookup {
    pub fn new(aggregator: Option<ElementKind>) -> Self {
        Self { groups: HashMap::new(), aggregator }
    }

    pub fn add(&mut self, key: &[Value], value: Value) {
        if let Some(key) = Helpers::canonical_tuple(key) {
            self.groups.entry(key).or_default().push(value);
        }
    }

    /// Unmatched or null keys get an empty collection.
    pub fn lookup(&self, key: &[Value]) -> Result<Value> {
        let values = Helpers::canonical_tuple(key).and_then(|k| self.groups.get(&k)).cloned().unwrap_or_default();
        Aggregator::apply(self.aggregator, values)
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Everything a projector may read while shaping one row.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub row: &'a Row,
    pub outer: Option<&'a Row>,
    pub nested: &'a [Value],
    pub client_joins: &'a [ClientJoinLookup],
}

impl<'a> ProjectionContext<'a> {
    pub fn new(row: &'a Row) -> Self {
        Self { row, outer: None, nested: &[], client_joins: &[] }
    }
}

impl Projector {
    pub fn project(&self, ctx: &ProjectionContext<'_>) -> Result<Value> {
        match self {
            Projector::Column(name) => Ok(ctx.row.column(name)),
            Projector::Outer(name) => Ok(ctx.outer.map(|r| r.column(name)).unwrap_or(Value::Null)),
            Projector::Constant(v) => Ok(v.clone()),
            Projector::Record(fields) => {
                let mut map = Map::new();
                for (name, p) in fields {
                    map.insert(name.clone(), p.project(ctx)?);
                }
                Ok(Value::Object(map))
            }
            Projector::OuterJoined { test, expr } => {
                if test.project(ctx)?.is_null() {
                    return Ok(Value::Null);
                }
                expr.project(ctx)
            }
            Projector::Grouping { key, elements } => {
                let mut map = Map::new();
                map.insert("Key".into(), key.project(ctx)?);
                map.insert("Elements".into(), elements.project(ctx)?);
                Ok(Value::Object(map))
            }
            Projector::Eval { expr, alias } => {
                let lookup = |c: &crate::expr::ColumnExpr| match (c.alias, ctx.outer) {
                    (Some(a), Some(outer)) if a != *alias => outer.column(&c.name),
                    _ => ctx.row.column(&c.name),
                };
                Eval::eval_scalar(expr, &lookup)
            }
            Projector::Nested(index) => Ok(ctx.nested.get(*index).cloned().unwrap_or(Value::Null)),
            Projector::ClientJoin { index, outer_key } => {
                let key = outer_key.iter().map(|k| k.project(ctx)).collect::<Result<Vec<_>>>()?;
                match ctx.client_joins.get(*index) {
                    Some(lookup) => lookup.lookup(&key),
                    None => Ok(Value::Array(Vec::new())),
                }
            }
        }
    }

    /// Projects the same key list against one row; used for client-join
    /// inner keys.
    pub fn project_all(projectors: &[Projector], ctx: &ProjectionContext<'_>) -> Result<Vec<Value>> {
        projectors.iter().map(|p| p.project(ctx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::expr::{BinaryOp, Expr, SqlType};

    fn row(v: Value) -> Row {
        Row::from_json(v).unwrap()
    }

    #[test]
    fn record_reads_named_columns() {
        let r = row(json!({"Id": 1, "Name": "Alfreds"}));
        let p = Projector::Record(vec![
            ("Name".into(), Projector::Column("Name".into())),
            ("Id".into(), Projector::Column("Id".into())),
            ("Kind".into(), Projector::Constant(json!("customer"))),
        ]);
        let out = p.project(&ProjectionContext::new(&r)).unwrap();
        assert_eq!(out, json!({"Name": "Alfreds", "Id": 1, "Kind": "customer"}));
    }

    #[test]
    fn outer_joined_is_null_when_the_test_is_null() {
        let p = Projector::OuterJoined {
            test: Box::new(Projector::Column("test".into())),
            expr: Box::new(Projector::Record(vec![("Name".into(), Projector::Column("Name".into()))])),
        };
        let missing = row(json!({"test": null, "Name": null}));
        assert_eq!(p.project(&ProjectionContext::new(&missing)).unwrap(), Value::Null);
        let present = row(json!({"test": 1, "Name": "Ana"}));
        assert_eq!(p.project(&ProjectionContext::new(&present)).unwrap(), json!({"Name": "Ana"}));
    }

    #[test]
    fn eval_reads_outer_columns_for_foreign_aliases() {
        let inner_alias = TableAlias::new();
        let outer_alias = TableAlias::new();
        let expr = Expr::binary(
            BinaryOp::Add,
            Expr::column(inner_alias, "Freight", SqlType::int()),
            Expr::column(outer_alias, "Bonus", SqlType::int()),
        );
        let r = row(json!({"Freight": 10}));
        let outer = row(json!({"Bonus": 5}));
        let ctx = ProjectionContext { outer: Some(&outer), ..ProjectionContext::new(&r) };
        let p = Projector::Eval { expr, alias: inner_alias };
        assert_eq!(p.project(&ctx).unwrap(), json!(15));
    }

    #[test]
    fn client_join_lookup_keeps_fetch_order_and_ignores_null_keys() {
        let mut lookup = ClientJoinLookup::new(None);
        lookup.add(&[json!(1)], json!("a"));
        lookup.add(&[json!(2)], json!("b"));
        lookup.add(&[json!(1)], json!("c"));
        lookup.add(&[Value::Null], json!("orphan"));
        assert_eq!(lookup.len(), 3);
        assert_eq!(lookup.lookup(&[json!(1)]).unwrap(), json!(["a", "c"]));
        assert_eq!(lookup.lookup(&[json!(3)]).unwrap(), json!([]));
        assert_eq!(lookup.lookup(&[Value::Null]).unwrap(), json!([]));
    }

    #[test]
    fn client_join_projector_matches_on_the_outer_key() {
        let mut lookup = ClientJoinLookup::new(None);
        lookup.add(&[json!(7)], json!({"Freight": 3}));
        let joins = [lookup];
        let r = row(json!({"Id": 7}));
        let ctx = ProjectionContext { client_joins: &joins, ..ProjectionContext::new(&r) };
        let p = Projector::ClientJoin { index: 0, outer_key: vec![Projector::Column("Id".into())] };
        assert_eq!(p.project(&ctx).unwrap(), json!([{"Freight": 3}]));
    }
}
