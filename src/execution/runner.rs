use std::collections::HashMap;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{QueryError, Result};
use crate::execution::row_sequence::log_dispatch;
use crate::execution::{
    Aggregator, AsyncQueryExecutor, AsyncRowSequence, Bindings, ClientJoinLookup, ClientJoinPlan, CommandPlan,
    ConnectionScope, ExecutionPlan, ExecutorFuture, Projector, ProjectionContext, QueryExecutor, QueryPlan, Row,
    RowSequence,
};

type Variables = HashMap<String, Value>;

fn empty_declaration() -> QueryError {
    QueryError::cardinality("declaration source returned no rows")
}

fn declare(variables: &mut Variables, names: &[String], row: &Row) {
    for name in names {
        variables.insert(name.clone(), row.column(name));
    }
}

fn group_client_join(join: &ClientJoinPlan, shaped: Vec<(Row, Value)>) -> Result<ClientJoinLookup> {
    let mut lookup = ClientJoinLookup::new(join.query.aggregator);
    for (row, value) in shaped {
        let key = Projector::project_all(&join.inner_key, &ProjectionContext::new(&row))?;
        lookup.add(&key, value);
    }
    trace!(groups = lookup.len(), "client join grouped");
    Ok(lookup)
}

/// Runs an [`ExecutionPlan`] against a blocking executor. Every command of
/// one `run` shares a single connection scope.
pub struct PlanRunner<'e> {
    executor: &'e dyn QueryExecutor,
    scope: ConnectionScope<'e, dyn QueryExecutor + 'e>,
    log_sql: bool,
}

impl<'e> PlanRunner<'e> {
    pub fn new(executor: &'e dyn QueryExecutor) -> Self {
        Self { executor, scope: ConnectionScope::new(executor), log_sql: false }
    }

    pub fn with_sql_logging(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    pub fn run(&self, plan: &ExecutionPlan) -> Result<Value> {
        let _connection = self.scope.enter()?;
        let mut variables = Variables::new();
        self.run_plan(plan, None, &mut variables)
    }

    /// Runs each plan in order over one connection, stopping at the first
    /// failure.
    pub fn run_all(&self, plans: &[ExecutionPlan]) -> Result<Vec<Value>> {
        let _connection = self.scope.enter()?;
        plans.iter().map(|plan| self.run(plan)).collect()
    }

    fn run_plan(&self, plan: &ExecutionPlan, item: Option<&Value>, variables: &mut Variables) -> Result<Value> {
        match plan {
            ExecutionPlan::Query(q) => {
                let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                let shaped = self.materialize(q, &bindings)?;
                Aggregator::apply(q.aggregator, shaped.into_iter().map(|(_, v)| v).collect())
            }
            ExecutionPlan::Command(c) => {
                let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                self.execute(c, &bindings).map(Value::from)
            }
            ExecutionPlan::Batch { operation, items, batch_size } => match operation.as_ref() {
                ExecutionPlan::Command(c) => {
                    let sets = items
                        .iter()
                        .map(|item| c.bind(&Bindings { item: Some(item), ..Bindings::default() }))
                        .collect::<Result<Vec<_>>>()?;
                    debug!(items = sets.len(), batch_size, "dispatching batch");
                    log_dispatch(&c.command, sets.first().map(Vec::as_slice).unwrap_or_default(), self.log_sql);
                    let affected = self.executor.execute_batch(&c.command, &sets, *batch_size)?;
                    Ok(Value::Array(affected.into_iter().map(Value::from).collect()))
                }
                other => items
                    .iter()
                    .map(|item| self.run_plan(other, Some(item), &mut Variables::new()))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array),
            },
            ExecutionPlan::Block(plans) => {
                let mut last = Value::Null;
                for plan in plans {
                    last = self.run_plan(plan, item, variables)?;
                }
                Ok(last)
            }
            ExecutionPlan::If { check, if_true, if_false } => {
                let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                let found = !self.fetch(&check.command, &bindings)?.is_empty();
                trace!(found, "conditional check");
                match (found, if_false) {
                    (true, _) => self.run_plan(if_true, item, variables),
                    (false, Some(otherwise)) => self.run_plan(otherwise, item, variables),
                    (false, None) => Ok(Value::Null),
                }
            }
            ExecutionPlan::Declaration { source, variables: names } => {
                let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                let rows = self.fetch(&source.command, &bindings)?;
                let row = rows.into_iter().next().ok_or_else(empty_declaration)?;
                declare(variables, names, &row);
                Ok(Value::Null)
            }
        }
    }

    fn fetch(&self, command: &CommandPlan, bindings: &Bindings<'_>) -> Result<Vec<Row>> {
        let values = command.bind(bindings)?;
        let _connection = self.scope.enter()?;
        RowSequence::new(self.executor, &command.command, values).with_sql_logging(self.log_sql).read_all()
    }

    fn execute(&self, command: &CommandPlan, bindings: &Bindings<'_>) -> Result<u64> {
        let values = command.bind(bindings)?;
        let _connection = self.scope.enter()?;
        log_dispatch(&command.command, &values, self.log_sql);
        self.executor.execute_command(&command.command, &values)
    }

    /// Rows of `q` paired with their projected values. Client joins run
    /// once up front; nested queries run once per row.
    fn materialize(&self, q: &QueryPlan, bindings: &Bindings<'_>) -> Result<Vec<(Row, Value)>> {
        let rows = self.fetch(&q.command, bindings)?;
        let mut lookups = Vec::with_capacity(q.client_joins.len());
        for join in &q.client_joins {
            let shaped = self.materialize(&join.query, bindings)?;
            lookups.push(group_client_join(join, shaped)?);
        }

        let mut shaped = Vec::with_capacity(rows.len());
        for row in rows {
            let mut nested = Vec::with_capacity(q.nested.len());
            for inner in &q.nested {
                let values = self.materialize(inner, &Bindings { outer: Some(&row), ..*bindings })?;
                nested.push(Aggregator::apply(inner.aggregator, values.into_iter().map(|(_, v)| v).collect())?);
            }
            let ctx = ProjectionContext { row: &row, outer: bindings.outer, nested: &nested, client_joins: &lookups };
            let value = q.projector.project(&ctx)?;
            shaped.push((row, value));
        }
        Ok(shaped)
    }
}

/// Non-blocking twin of [`PlanRunner`]. Cancellation is checked before
/// every command and between rows.
pub struct AsyncPlanRunner<'e> {
    executor: &'e dyn AsyncQueryExecutor,
    scope: ConnectionScope<'e, dyn AsyncQueryExecutor + 'e>,
    cancel: CancellationToken,
    log_sql: bool,
}

impl<'e> AsyncPlanRunner<'e> {
    pub fn new(executor: &'e dyn AsyncQueryExecutor, cancel: CancellationToken) -> Self {
        Self { executor, scope: ConnectionScope::new(executor), cancel, log_sql: false }
    }

    pub fn with_sql_logging(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    pub async fn run(&self, plan: &ExecutionPlan) -> Result<Value> {
        let _connection = self.scope.enter()?;
        let mut variables = Variables::new();
        self.run_plan(plan, None, &mut variables).await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        Ok(())
    }

    fn run_plan<'a>(
        &'a self,
        plan: &'a ExecutionPlan,
        item: Option<&'a Value>,
        variables: &'a mut Variables,
    ) -> ExecutorFuture<'a, Result<Value>> {
        Box::pin(async move {
            match plan {
                ExecutionPlan::Query(q) => {
                    let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                    let shaped = self.materialize(q, bindings).await?;
                    Aggregator::apply(q.aggregator, shaped.into_iter().map(|(_, v)| v).collect())
                }
                ExecutionPlan::Command(c) => {
                    let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                    self.execute(c, bindings).await.map(Value::from)
                }
                ExecutionPlan::Batch { operation, items, batch_size } => match operation.as_ref() {
                    ExecutionPlan::Command(c) => {
                        self.check_cancelled()?;
                        let sets = items
                            .iter()
                            .map(|item| c.bind(&Bindings { item: Some(item), ..Bindings::default() }))
                            .collect::<Result<Vec<_>>>()?;
                        debug!(items = sets.len(), batch_size, "dispatching batch");
                        log_dispatch(&c.command, sets.first().map(Vec::as_slice).unwrap_or_default(), self.log_sql);
                        let affected = self.executor.execute_batch(&c.command, &sets, *batch_size).await?;
                        Ok(Value::Array(affected.into_iter().map(Value::from).collect()))
                    }
                    other => {
                        let mut results = Vec::with_capacity(items.len());
                        for item in items.iter() {
                            let mut fresh = Variables::new();
                            results.push(self.run_plan(other, Some(item), &mut fresh).await?);
                        }
                        Ok(Value::Array(results))
                    }
                },
                ExecutionPlan::Block(plans) => {
                    let mut last = Value::Null;
                    for plan in plans {
                        last = self.run_plan(plan, item, &mut *variables).await?;
                    }
                    Ok(last)
                }
                ExecutionPlan::If { check, if_true, if_false } => {
                    let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                    let found = !self.fetch(&check.command, bindings).await?.is_empty();
                    trace!(found, "conditional check");
                    match (found, if_false) {
                        (true, _) => self.run_plan(if_true, item, variables).await,
                        (false, Some(otherwise)) => self.run_plan(otherwise, item, variables).await,
                        (false, None) => Ok(Value::Null),
                    }
                }
                ExecutionPlan::Declaration { source, variables: names } => {
                    let bindings = Bindings { item, outer: None, variables: Some(&*variables) };
                    let rows = self.fetch(&source.command, bindings).await?;
                    let row = rows.into_iter().next().ok_or_else(empty_declaration)?;
                    declare(variables, names, &row);
                    Ok(Value::Null)
                }
            }
        })
    }

    fn fetch<'a>(&'a self, command: &'a CommandPlan, bindings: Bindings<'a>) -> ExecutorFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            let values = command.bind(&bindings)?;
            let _connection = self.scope.enter()?;
            AsyncRowSequence::new(self.executor, &command.command, values, self.cancel.clone())
                .with_sql_logging(self.log_sql)
                .read_all()
                .await
        })
    }

    async fn execute(&self, command: &CommandPlan, bindings: Bindings<'_>) -> Result<u64> {
        self.check_cancelled()?;
        let values = command.bind(&bindings)?;
        let _connection = self.scope.enter()?;
        log_dispatch(&command.command, &values, self.log_sql);
        self.executor.execute_command(&command.command, &values).await
    }

    fn materialize<'a>(&'a self, q: &'a QueryPlan, bindings: Bindings<'a>) -> ExecutorFuture<'a, Result<Vec<(Row, Value)>>> {
        Box::pin(async move {
            let rows = self.fetch(&q.command, bindings).await?;
            let mut lookups = Vec::with_capacity(q.client_joins.len());
            for join in &q.client_joins {
                let shaped = self.materialize(&join.query, bindings).await?;
                lookups.push(group_client_join(join, shaped)?);
            }

            let mut shaped = Vec::with_capacity(rows.len());
            for row in rows {
                let mut nested = Vec::with_capacity(q.nested.len());
                for inner in &q.nested {
                    let values = self.materialize(inner, Bindings { outer: Some(&row), ..bindings }).await?;
                    nested.push(Aggregator::apply(inner.aggregator, values.into_iter().map(|(_, v)| v).collect())?);
                }
                let ctx = ProjectionContext { row: &row, outer: bindings.outer, nested: &nested, client_joins: &lookups };
                let value = q.projector.project(&ctx)?;
                shaped.push((row, value));
            }
            Ok(shaped)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::_tests::fixtures::ScriptedExecutor;
    use crate::execution::ValueSource;
    use crate::expr::{ElementKind, QueryCommand, QueryParameter, SqlType, ValueKind};

    fn command(text: &str, values: Vec<ValueSource>) -> CommandPlan {
        let parameters = (0..values.len())
            .map(|i| QueryParameter::new(format!("p{i}"), ValueKind::Int, SqlType::int()))
            .collect();
        CommandPlan { command: QueryCommand::new(text, parameters), values }
    }

    fn query(text: &str, projector: Projector, aggregator: Option<ElementKind>) -> QueryPlan {
        QueryPlan { command: command(text, vec![]), projector, aggregator, nested: vec![], client_joins: vec![] }
    }

    fn customers() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on("FROM [Orders]", vec![
                json!({"OrderId": 10, "CustomerId": 1}),
                json!({"OrderId": 11, "CustomerId": 1}),
                json!({"OrderId": 12, "CustomerId": 2}),
            ])
            .on("FROM [Customers]", vec![json!({"Id": 1, "Name": "Alfreds"}), json!({"Id": 2, "Name": "Bon app"}), json!({"Id": 3, "Name": "Chop-suey"})])
    }

    fn order_ids() -> Projector {
        Projector::Column("OrderId".into())
    }

    #[test]
    fn client_joins_match_children_by_key() {
        let executor = customers();
        let mut plan = query(
            "SELECT * FROM [Customers]",
            Projector::Record(vec![
                ("Name".into(), Projector::Column("Name".into())),
                ("Orders".into(), Projector::ClientJoin { index: 0, outer_key: vec![Projector::Column("Id".into())] }),
            ]),
            None,
        );
        plan.client_joins.push(ClientJoinPlan {
            query: query("SELECT * FROM [Orders]", order_ids(), None),
            inner_key: vec![Projector::Column("CustomerId".into())],
        });

        let result = PlanRunner::new(&executor).run(&ExecutionPlan::Query(plan)).unwrap();
        assert_eq!(
            result,
            json!([
                {"Name": "Alfreds", "Orders": [10, 11]},
                {"Name": "Bon app", "Orders": [12]},
                {"Name": "Chop-suey", "Orders": []},
            ])
        );
        assert_eq!(executor.executed().len(), 2);
        assert_eq!(executor.opened(), 1);
        assert_eq!(executor.closed(), 1);
    }

    #[test]
    fn nested_queries_run_once_per_row_with_outer_values() {
        let executor = customers();
        let mut plan = query(
            "SELECT * FROM [Customers]",
            Projector::Record(vec![("Id".into(), Projector::Column("Id".into())), ("Orders".into(), Projector::Nested(0))]),
            None,
        );
        plan.nested.push(QueryPlan {
            command: command("SELECT * FROM [Orders] WHERE CustomerId = @n0", vec![ValueSource::OuterColumn("Id".into())]),
            projector: order_ids(),
            aggregator: Some(ElementKind::FirstOrDefault),
            nested: vec![],
            client_joins: vec![],
        });

        let result = PlanRunner::new(&executor).run(&ExecutionPlan::Query(plan)).unwrap();
        assert_eq!(result.as_array().map(Vec::len), Some(3));
        let executed = executor.executed();
        assert_eq!(executed.len(), 4);
        assert_eq!(executed[1].1, vec![json!(1)]);
        assert_eq!(executed[3].1, vec![json!(3)]);
    }

    #[test]
    fn single_fails_on_too_many_rows() {
        let executor = customers();
        let plan = query("SELECT * FROM [Customers]", Projector::Column("Name".into()), Some(ElementKind::Single));
        match PlanRunner::new(&executor).run(&ExecutionPlan::Query(plan)) {
            Err(QueryError::Cardinality(msg)) => assert!(msg.contains("got 3")),
            other => panic!("expected cardinality error, got {other:?}"),
        }
        assert_eq!(executor.closed_readers(), 1);
    }

    #[test]
    fn declarations_feed_later_commands() {
        let executor = ScriptedExecutor::new().on("last_insert_rowid", vec![json!({"Id": 42})]).on_command("INSERT", 1);
        let plan = ExecutionPlan::Block(vec![
            ExecutionPlan::Command(command("INSERT INTO [Employees] (Name) VALUES ('x')", vec![])),
            ExecutionPlan::Declaration {
                source: query("SELECT last_insert_rowid() AS Id", Projector::Column("Id".into()), None),
                variables: vec!["Id".into()],
            },
            ExecutionPlan::Command(command("INSERT INTO [EmployeeDetails] (EmployeeId) VALUES (@Id)", vec![ValueSource::Variable("Id".into())])),
        ]);
        assert_eq!(PlanRunner::new(&executor).run(&plan).unwrap(), json!(1));
        let executed = executor.executed();
        assert_eq!(executed.last().map(|(_, v)| v.clone()), Some(vec![json!(42)]));
    }

    #[test]
    fn if_plans_choose_a_branch_on_the_client() {
        let executor = ScriptedExecutor::new().on("FROM [Customers]", vec![json!({"Id": 1})]).on_command("UPDATE", 1).on_command("INSERT", 1);
        let plan = ExecutionPlan::If {
            check: query("SELECT 1 FROM [Customers] WHERE Id = 1", Projector::Constant(json!(1)), None),
            if_true: Box::new(ExecutionPlan::Command(command("UPDATE [Customers] SET Name = 'x'", vec![]))),
            if_false: Some(Box::new(ExecutionPlan::Command(command("INSERT INTO [Customers] (Name) VALUES ('x')", vec![])))),
        };
        PlanRunner::new(&executor).run(&plan).unwrap();
        assert!(executor.executed().iter().any(|(sql, _)| sql.starts_with("UPDATE")));
        assert!(!executor.executed().iter().any(|(sql, _)| sql.starts_with("INSERT")));
    }

    #[test]
    fn batches_bind_every_item() {
        let executor = ScriptedExecutor::new().on_command("DELETE", 1);
        let plan = ExecutionPlan::Batch {
            operation: Box::new(ExecutionPlan::Command(command("DELETE FROM [Customers] WHERE Id = @Id", vec![ValueSource::ItemMember("Id".into())]))),
            items: Arc::new(vec![json!({"Id": 1}), json!({"Id": 2}), json!({"Id": 3})]),
            batch_size: 2,
        };
        assert_eq!(PlanRunner::new(&executor).run(&plan).unwrap(), json!([1, 1, 1]));
        let values: Vec<_> = executor.executed().into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);
    }

    #[tokio::test]
    async fn async_runner_matches_the_blocking_one() {
        let executor = customers();
        let mut plan = query(
            "SELECT * FROM [Customers]",
            Projector::Record(vec![
                ("Name".into(), Projector::Column("Name".into())),
                ("Orders".into(), Projector::ClientJoin { index: 0, outer_key: vec![Projector::Column("Id".into())] }),
            ]),
            None,
        );
        plan.client_joins.push(ClientJoinPlan {
            query: query("SELECT * FROM [Orders]", order_ids(), None),
            inner_key: vec![Projector::Column("CustomerId".into())],
        });
        let plan = ExecutionPlan::Query(plan);

        let blocking = PlanRunner::new(&executor).run(&plan).unwrap();
        let non_blocking = AsyncPlanRunner::new(&executor, CancellationToken::new()).run(&plan).await.unwrap();
        assert_eq!(blocking, non_blocking);
    }

    #[tokio::test]
    async fn cancelled_runs_stop_before_dispatch() {
        let executor = customers();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let plan = ExecutionPlan::Query(query("SELECT * FROM [Customers]", Projector::Column("Name".into()), None));
        match AsyncPlanRunner::new(&executor, cancel).run(&plan).await {
            Err(QueryError::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert!(executor.executed().is_empty());
        assert_eq!(executor.closed(), 1);
    }
}
