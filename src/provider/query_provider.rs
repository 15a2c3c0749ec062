use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::dialect::{default_language, Language, Linguist};
use crate::error::{QueryError, Result};
use crate::execution::{
    topological_sort, AsyncPlanRunner, AsyncQueryExecutor, DeferredValue, ExecutionBuilder, ExecutionPlan, PlanRunner,
    QueryExecutor,
};
use crate::expr::ExprRef;
use crate::mapping::{QueryMapper, QueryMapping, WriteKind};
use crate::policy::{QueryPolice, QueryPolicy};
use crate::provider::{Change, ChangeSet};
use crate::query::Query;
use crate::visitor::PlanWriter;

/// A query or command carried through every stage: the final tree (what
/// `get_query_plan` prints) and the plan that runs it.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub expr: ExprRef,
    pub plan: ExecutionPlan,
}

impl CompiledQuery {
    /// Command texts, outermost first, separated by a blank line.
    pub fn text(&self) -> String {
        self.plan.commands().iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n")
    }
}

/// Entry point tying mapping, policy and dialect together. Translation
/// never touches the executor; execution methods take the executor per
/// call.
pub struct QueryProvider {
    mapping: Arc<dyn QueryMapping>,
    config: ProviderConfig,
    policy: QueryPolicy,
}

impl QueryProvider {
    pub fn new(mapping: Arc<dyn QueryMapping>, config: ProviderConfig) -> Self {
        let policy = QueryPolicy::new().with_client_joins(config.client_joins);
        Self { mapping, config, policy }
    }

    /// Client joins stay off when the configuration turns them off.
    pub fn with_policy(mut self, policy: QueryPolicy) -> Self {
        let client_joins = policy.client_joins() && self.config.client_joins;
        self.policy = policy.with_client_joins(client_joins);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    pub fn language(&self) -> &'static dyn Language {
        default_language(self.config.dialect)
    }

    fn mapper(&self) -> QueryMapper<'_> {
        QueryMapper::new(self.mapping.as_ref(), self.language())
    }

    pub fn translate(&self, query: &Query) -> Result<CompiledQuery> {
        let mapper = self.mapper();
        let mapped = mapper.translate(query.expr())?;
        self.police_and_compile(&mapper, &mapped)
    }

    fn police_and_compile(&self, mapper: &QueryMapper<'_>, expr: &ExprRef) -> Result<CompiledQuery> {
        let policed = QueryPolice::apply(mapper, &self.policy, expr)?;
        self.compile(&policed)
    }

    fn compile(&self, expr: &ExprRef) -> Result<CompiledQuery> {
        let language = self.language();
        let expr = Linguist::translate(language, expr)?;
        let plan = ExecutionBuilder::build(language, &expr)?;
        Ok(CompiledQuery { expr, plan })
    }

    pub fn get_query_text(&self, query: &Query) -> Result<String> {
        Ok(self.translate(query)?.text())
    }

    pub fn get_query_plan(&self, query: &Query) -> Result<String> {
        Ok(PlanWriter::write(&self.translate(query)?.expr))
    }

    fn runner<'e>(&self, executor: &'e dyn QueryExecutor) -> PlanRunner<'e> {
        PlanRunner::new(executor).with_sql_logging(self.config.log_sql)
    }

    pub fn execute(&self, executor: &dyn QueryExecutor, query: &Query) -> Result<Value> {
        let compiled = self.translate(query)?;
        self.runner(executor).run(&compiled.plan)
    }

    /// Execute and deserialize the result.
    pub fn execute_as<T: DeserializeOwned>(&self, executor: &dyn QueryExecutor, query: &Query) -> Result<T> {
        let value = self.execute(executor, query)?;
        serde_json::from_value(value).map_err(QueryError::execution)
    }

    pub async fn execute_async(&self, executor: &dyn AsyncQueryExecutor, query: &Query, cancel: &CancellationToken) -> Result<Value> {
        let compiled = self.translate(query)?;
        AsyncPlanRunner::new(executor, cancel.clone()).with_sql_logging(self.config.log_sql).run(&compiled.plan).await
    }

    /// Translate now, run on first access. Translation errors surface here,
    /// not when the value is read.
    pub fn defer<'a>(&self, executor: &'a (dyn QueryExecutor + Sync), query: &Query) -> Result<DeferredValue<'a, Value>> {
        let plan = self.translate(query)?.plan;
        let log_sql = self.config.log_sql;
        Ok(DeferredValue::new(move || PlanRunner::new(executor).with_sql_logging(log_sql).run(&plan)))
    }

    pub fn get_by_id(&self, executor: &dyn QueryExecutor, entity: &str, keys: &[Value]) -> Result<Value> {
        let mapper = self.mapper();
        let lookup = mapper.get_by_id(entity, keys)?;
        let compiled = self.police_and_compile(&mapper, &lookup)?;
        self.runner(executor).run(&compiled.plan)
    }

    fn write(&self, executor: &dyn QueryExecutor, command: Result<ExprRef>) -> Result<Value> {
        let compiled = self.compile(&command?)?;
        self.runner(executor).run(&compiled.plan)
    }

    /// Rows affected.
    pub fn insert(&self, executor: &dyn QueryExecutor, entity: &str, instance: &Value) -> Result<Value> {
        self.write(executor, self.mapper().insert(entity, instance))
    }

    /// The identity the database generated for the new row.
    pub fn insert_returning_id(&self, executor: &dyn QueryExecutor, entity: &str, instance: &Value) -> Result<Value> {
        self.write(executor, self.mapper().insert_returning_id(entity, instance))
    }

    pub fn update(&self, executor: &dyn QueryExecutor, entity: &str, instance: &Value, original: Option<&Value>) -> Result<Value> {
        self.write(executor, self.mapper().update(entity, instance, original))
    }

    pub fn delete(&self, executor: &dyn QueryExecutor, entity: &str, instance: &Value) -> Result<Value> {
        self.write(executor, self.mapper().delete(entity, instance))
    }

    pub fn upsert(&self, executor: &dyn QueryExecutor, entity: &str, instance: &Value) -> Result<Value> {
        self.write(executor, self.mapper().upsert(entity, instance))
    }

    /// One write per item, `batch_size` items per round trip.
    pub fn batch(&self, executor: &dyn QueryExecutor, entity: &str, kind: WriteKind, items: Vec<Value>) -> Result<Value> {
        self.write(executor, self.mapper().batch(entity, kind, items, self.config.batch_size))
    }

    /// Entities that must be written before `entity` because it holds a
    /// foreign key to them.
    fn dependencies<'m>(&'m self, entity: &str) -> Vec<&'m str> {
        let mapping = self.mapping.as_ref();
        mapping
            .get_mapped_members(entity)
            .into_iter()
            .filter(|m| mapping.is_singleton_relationship(entity, m))
            .filter(|m| {
                mapping
                    .get_association_key_members(entity, m)
                    .is_some_and(|keys| keys.local.iter().any(|k| !mapping.is_primary_key(entity, k)))
            })
            .filter_map(|m| mapping.get_related_entity(entity, m))
            .filter(|related| *related != entity)
            .collect()
    }

    /// Writes every change over one connection. Inserts and updates run
    /// parents first, deletes children first. Snapshot updates with no
    /// modified member are skipped. Returns each written change's result
    /// in execution order.
    pub fn submit_changes(&self, executor: &dyn QueryExecutor, changes: &ChangeSet) -> Result<Vec<Value>> {
        let entities = changes.entities();
        let mut edges = Vec::new();
        for entity in &entities {
            for parent in self.dependencies(entity) {
                if entities.contains(&parent) {
                    edges.push((parent, *entity));
                }
            }
        }
        let order = topological_sort(&entities, &edges)?;
        debug!(changes = changes.len(), order = ?order, "submitting changes");

        let mapper = self.mapper();
        let mut by_entity: IndexMap<&str, Vec<&Change>> = order.iter().map(|e| (*e, Vec::new())).collect();
        for change in changes.iter() {
            if let Some(list) = by_entity.get_mut(change.entity.as_str()) {
                list.push(change);
            }
        }
        let writes = by_entity.values().flatten().filter(|c| c.kind != WriteKind::Delete);
        let deletes = by_entity.values().rev().flatten().filter(|c| c.kind == WriteKind::Delete);

        let mut plans = Vec::with_capacity(changes.len());
        for change in writes.chain(deletes) {
            let command = match (change.kind, &change.original) {
                (WriteKind::Insert, _) => mapper.insert(&change.entity, &change.instance)?,
                (WriteKind::Update, Some(original)) => {
                    if !mapper.is_modified(&change.entity, &change.instance, original)? {
                        continue;
                    }
                    mapper.update(&change.entity, &change.instance, Some(original))?
                }
                (WriteKind::Update, None) => mapper.update(&change.entity, &change.instance, None)?,
                (WriteKind::Delete, _) => mapper.delete(&change.entity, &change.instance)?,
            };
            plans.push(self.compile(&command)?.plan);
        }
        self.runner(executor).run_all(&plans)
    }
}
