use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::execution::{Projector, Row};
use crate::expr::{ElementKind, QueryCommand};

/// Where the value of one command parameter comes from at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    Constant(Value),
    /// Member of the batch item currently being written.
    ItemMember(String),
    /// Column of the enclosing row for nested per-row queries.
    OuterColumn(String),
    /// Value a previous declaration stored.
    Variable(String),
}

/// What a [`ValueSource`] can read from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bindings<'a> {
    pub item: Option<&'a Value>,
    pub outer: Option<&'a Row>,
    pub variables: Option<&'a HashMap<String, Value>>,
}

impl ValueSource {
    pub fn resolve(&self, bindings: &Bindings<'_>) -> Result<Value> {
        match self {
            ValueSource::Constant(v) => Ok(v.clone()),
            ValueSource::ItemMember(member) => bindings
                .item
                .map(|item| item.get(member).cloned().unwrap_or(Value::Null))
                .ok_or_else(|| QueryError::internal(format!("item member '{member}' read outside a batch"))),
            ValueSource::OuterColumn(name) => bindings
                .outer
                .map(|row| row.column(name))
                .ok_or_else(|| QueryError::internal(format!("outer column '{name}' read without an outer row"))),
            ValueSource::Variable(name) => bindings
                .variables
                .and_then(|vars| vars.get(name).cloned())
                .ok_or_else(|| QueryError::internal(format!("variable '{name}' read before it was declared"))),
        }
    }
}

/// A formatted command and the sources of its parameter values, in
/// parameter order.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub command: QueryCommand,
    pub values: Vec<ValueSource>,
}

impl CommandPlan {
    pub fn bind(&self, bindings: &Bindings<'_>) -> Result<Vec<Value>> {
        self.values.iter().map(|v| v.resolve(bindings)).collect()
    }
}

/// A query: one command, a projector per row and an optional reduction.
/// Nested plans run once per row; client joins run once per query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub command: CommandPlan,
    pub projector: Projector,
    pub aggregator: Option<ElementKind>,
    pub nested: Vec<QueryPlan>,
    pub client_joins: Vec<ClientJoinPlan>,
}

#[derive(Debug, Clone)]
pub struct ClientJoinPlan {
    pub query: QueryPlan,
    pub inner_key: Vec<Projector>,
}

#[derive(Debug, Clone)]
pub enum ExecutionPlan {
    Query(QueryPlan),
    Command(CommandPlan),
    /// One operation run for every item, `batch_size` items per round trip.
    Batch { operation: Box<ExecutionPlan>, items: Arc<Vec<Value>>, batch_size: usize },
    /// Members run in order; the last one's result is the block's result.
    Block(Vec<ExecutionPlan>),
    /// `check` yielding any row selects `if_true`.
    If { check: QueryPlan, if_true: Box<ExecutionPlan>, if_false: Option<Box<ExecutionPlan>> },
    /// The first row of `source` sets each named variable.
    Declaration { source: QueryPlan, variables: Vec<String> },
}

impl ExecutionPlan {
    /// Every command the plan may send, outermost first.
    pub fn commands(&self) -> Vec<&QueryCommand> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a QueryCommand>) {
        match self {
            ExecutionPlan::Query(q) => q.collect(out),
            ExecutionPlan::Command(c) => out.push(&c.command),
            ExecutionPlan::Batch { operation, .. } => operation.collect(out),
            ExecutionPlan::Block(plans) => plans.iter().for_each(|p| p.collect(out)),
            ExecutionPlan::If { check, if_true, if_false } => {
                check.collect(out);
                if_true.collect(out);
                if let Some(if_false) = if_false {
                    if_false.collect(out);
                }
            }
            ExecutionPlan::Declaration { source, .. } => source.collect(out),
        }
    }
}

impl QueryPlan {
    fn collect<'a>(&'a self, out: &mut Vec<&'a QueryCommand>) {
        out.push(&self.command.command);
        for join in &self.client_joins {
            join.query.collect(out);
        }
        for nested in &self.nested {
            nested.collect(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn value_sources_read_their_bindings() {
        let item = json!({"Name": "Alfreds"});
        let outer = Row::from_json(json!({"Id": 4})).unwrap();
        let vars = HashMap::from([("Id".to_string(), json!(12))]);
        let b = Bindings { item: Some(&item), outer: Some(&outer), variables: Some(&vars) };
        assert_eq!(ValueSource::ItemMember("Name".into()).resolve(&b).unwrap(), json!("Alfreds"));
        assert_eq!(ValueSource::ItemMember("City".into()).resolve(&b).unwrap(), Value::Null);
        assert_eq!(ValueSource::OuterColumn("Id".into()).resolve(&b).unwrap(), json!(4));
        assert_eq!(ValueSource::Variable("Id".into()).resolve(&b).unwrap(), json!(12));
    }

    #[test]
    fn missing_bindings_are_internal_errors() {
        let b = Bindings::default();
        assert!(matches!(ValueSource::ItemMember("Name".into()).resolve(&b), Err(QueryError::Internal(_))));
        assert!(matches!(ValueSource::Variable("Id".into()).resolve(&b), Err(QueryError::Internal(_))));
        assert_eq!(ValueSource::Constant(json!(1)).resolve(&b).unwrap(), json!(1));
    }

    #[test]
    fn commands_are_listed_outermost_first() {
        let cmd = |text: &str| CommandPlan { command: QueryCommand::new(text, vec![]), values: vec![] };
        let query = |text: &str| QueryPlan {
            command: cmd(text),
            projector: Projector::Column("Id".into()),
            aggregator: None,
            nested: vec![],
            client_joins: vec![],
        };
        let mut parent = query("SELECT customers");
        parent.client_joins.push(ClientJoinPlan { query: query("SELECT orders"), inner_key: vec![] });
        let plan = ExecutionPlan::Block(vec![ExecutionPlan::Command(cmd("DELETE")), ExecutionPlan::Query(parent)]);
        let texts: Vec<_> = plan.commands().iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["DELETE", "SELECT customers", "SELECT orders"]);
    }
}
