use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::dialect::{Language, Linguist};
use crate::error::{QueryError, Result};
use crate::execution::{ClientJoinPlan, CommandPlan, ExecutionPlan, Projector, QueryPlan, ValueSource};
use crate::expr::*;
use crate::rewrite::OuterParameterizer;
use crate::visitor::contains;

/// Turns a fully translated tree into an [`ExecutionPlan`]: one formatted
/// command per round trip, with projectors compiled for every query.
pub struct ExecutionBuilder<'l> {
    language: &'l dyn Language,
}

impl<'l> ExecutionBuilder<'l> {
    pub fn build(language: &'l dyn Language, expr: &ExprRef) -> Result<ExecutionPlan> {
        debug!(dialect = language.name(), "building execution plan");
        ExecutionBuilder { language }.build_plan(expr)
    }

    fn unsupported(&self, node: impl Into<String>) -> QueryError {
        QueryError::unsupported_in(node, self.language.name())
    }

    fn build_plan(&self, expr: &ExprRef) -> Result<ExecutionPlan> {
        let multi = self.language.allows_multiple_commands();
        match expr.as_ref() {
            Expr::Projection(_) => Ok(ExecutionPlan::Query(self.build_query(expr, None)?)),
            Expr::Select(_) => Ok(ExecutionPlan::Query(self.build_query(&select_projection(expr)?, None)?)),
            Expr::Insert(_) | Expr::Update(_) | Expr::Delete(_) => Ok(ExecutionPlan::Command(self.build_command(expr)?)),
            Expr::Block(commands) if multi => self.build_single_block(expr, commands),
            Expr::Block(commands) => {
                let plans = commands.iter().map(|c| self.build_plan(c)).collect::<Result<Vec<_>>>()?;
                Ok(ExecutionPlan::Block(plans))
            }
            Expr::If(_) if multi => Ok(ExecutionPlan::Command(self.build_command(expr)?)),
            Expr::If(i) => {
                let Expr::Exists(select) = i.check.as_ref() else {
                    return Err(self.unsupported(format!("IF on {}", i.check.kind_name())));
                };
                let check = self.build_query(&select_projection(select)?, None)?;
                let if_true = Box::new(self.build_plan(&i.if_true)?);
                let if_false = i.if_false.as_ref().map(|e| self.build_plan(e).map(Box::new)).transpose()?;
                Ok(ExecutionPlan::If { check, if_true, if_false })
            }
            Expr::Declaration(d) => {
                let source = self.build_query(&select_projection(&d.source)?, None)?;
                let variables = d.variables.iter().map(|v| v.name.clone()).collect();
                Ok(ExecutionPlan::Declaration { source, variables })
            }
            Expr::Batch(b) => {
                let operation = Box::new(self.build_plan(&b.operation)?);
                Ok(ExecutionPlan::Batch { operation, items: b.items.clone(), batch_size: b.batch_size })
            }
            other => Err(self.unsupported(format!("{} as a command", other.kind_name()))),
        }
    }

    /// Dialects that accept several statements send the block in one
    /// round trip; a trailing projection supplies the result rows.
    fn build_single_block(&self, expr: &ExprRef, commands: &[ExprRef]) -> Result<ExecutionPlan> {
        let leading = &commands[..commands.len().saturating_sub(1)];
        if leading.iter().any(|c| matches!(c.as_ref(), Expr::Projection(_) | Expr::Select(_))) {
            let plans = commands.iter().map(|c| self.build_plan(c)).collect::<Result<Vec<_>>>()?;
            return Ok(ExecutionPlan::Block(plans));
        }
        let Some(Expr::Projection(last)) = commands.last().map(|c| c.as_ref()) else {
            return Ok(ExecutionPlan::Command(self.build_command(expr)?));
        };
        let command = self.build_command(expr)?;
        let alias = last.select()?.alias;
        let mut plan = QueryPlan {
            command,
            projector: Projector::Constant(Value::Null),
            aggregator: last.aggregator,
            nested: Vec::new(),
            client_joins: Vec::new(),
        };
        plan.projector = self.compile(&last.projector, alias, None, &mut plan)?;
        Ok(ExecutionPlan::Query(plan))
    }

    fn build_command(&self, expr: &ExprRef) -> Result<CommandPlan> {
        let expr = Linguist::parameterize(self.language, expr)?;
        let text = Linguist::format(self.language, &expr)?;
        self.command_plan(text, &expr)
    }

    /// A projection, run once per outer row when `outer` is set. Outer
    /// columns the query reads become parameters first.
    fn build_query(&self, projection: &ExprRef, outer: Option<TableAlias>) -> Result<QueryPlan> {
        let projection = match outer {
            Some(alias) => OuterParameterizer::parameterize(alias, projection)?.0,
            None => projection.clone(),
        };
        let projection = Linguist::parameterize(self.language, &projection)?;
        let text = Linguist::format(self.language, &projection)?;
        let command = self.command_plan(text, &projection)?;

        let p = projection.as_projection()?;
        let alias = p.select()?.alias;
        let mut plan = QueryPlan {
            command,
            projector: Projector::Constant(Value::Null),
            aggregator: p.aggregator,
            nested: Vec::new(),
            client_joins: Vec::new(),
        };
        plan.projector = self.compile(&p.projector, alias, outer, &mut plan)?;
        Ok(plan)
    }

    fn command_plan(&self, text: String, expr: &ExprRef) -> Result<CommandPlan> {
        let mut gatherer = ParameterGatherer::default();
        gatherer.gather(expr)?;
        let mut parameters = Vec::with_capacity(gatherer.parameters.len());
        let mut values = Vec::with_capacity(gatherer.parameters.len());
        for (name, (sql_type, source)) in gatherer.parameters {
            parameters.push(QueryParameter::new(name, ValueKind::of_sql_type(&sql_type), sql_type));
            values.push(source);
        }
        trace!(sql = %text, parameters = parameters.len(), "command built");
        Ok(CommandPlan { command: QueryCommand::new(text, parameters), values })
    }

    fn compile(&self, expr: &ExprRef, alias: TableAlias, outer: Option<TableAlias>, plan: &mut QueryPlan) -> Result<Projector> {
        Ok(match expr.as_ref() {
            Expr::Column(c) if c.alias == Some(alias) => Projector::Column(c.name.clone()),
            Expr::Column(c) if outer.is_some() && c.alias == outer => Projector::Outer(c.name.clone()),
            Expr::Column(c) => {
                return Err(QueryError::UnboundColumn {
                    alias: c.alias.map(|a| a.to_string()).unwrap_or_else(|| "<none>".into()),
                    name: c.name.clone(),
                });
            }
            Expr::Constant(l) => Projector::Constant(l.to_json()),
            Expr::Record(r) => Projector::Record(
                r.fields
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.compile(e, alias, outer, plan)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Entity(e) => self.compile(&e.expr, alias, outer, plan)?,
            Expr::OuterJoined(o) => Projector::OuterJoined {
                test: Box::new(self.compile(&o.test, alias, outer, plan)?),
                expr: Box::new(self.compile(&o.expr, alias, outer, plan)?),
            },
            Expr::Grouping(g) => Projector::Grouping {
                key: Box::new(self.compile(&g.key, alias, outer, plan)?),
                elements: Box::new(self.compile(&g.elements, alias, outer, plan)?),
            },
            Expr::Projection(_) => {
                plan.nested.push(self.build_query(expr, Some(alias))?);
                Projector::Nested(plan.nested.len() - 1)
            }
            Expr::ClientJoin(cj) => {
                let query = self.build_query(&cj.projection, None)?;
                let inner_alias = cj.projection.as_projection()?.select()?.alias;
                let mut inner_key = Vec::with_capacity(cj.inner_key.len());
                for key in &cj.inner_key {
                    inner_key.push(self.compile_key(key, inner_alias)?);
                }
                let mut outer_key = Vec::with_capacity(cj.outer_key.len());
                for key in &cj.outer_key {
                    outer_key.push(self.compile(key, alias, outer, plan)?);
                }
                plan.client_joins.push(ClientJoinPlan { query, inner_key });
                Projector::ClientJoin { index: plan.client_joins.len() - 1, outer_key }
            }
            _ if client_evaluable(expr) => Projector::Eval { expr: expr.clone(), alias },
            other => return Err(self.unsupported(format!("{} in a projector", other.kind_name()))),
        })
    }

    fn compile_key(&self, key: &ExprRef, alias: TableAlias) -> Result<Projector> {
        match key.as_ref() {
            Expr::Column(c) if c.alias == Some(alias) => Ok(Projector::Column(c.name.clone())),
            _ if client_evaluable(key) => Ok(Projector::Eval { expr: key.clone(), alias }),
            other => Err(self.unsupported(format!("{} as a client join key", other.kind_name()))),
        }
    }
}

/// Scalar trees the client can compute from row values alone.
fn client_evaluable(expr: &Expr) -> bool {
    !contains(expr, |e| {
        !matches!(
            e,
            Expr::Constant(_)
                | Expr::Column(_)
                | Expr::Binary(_)
                | Expr::Unary(_)
                | Expr::Conditional(_)
                | Expr::Call(_)
                | Expr::IsNull(_)
                | Expr::Between(_)
                | Expr::NamedValue(_)
        ) && !matches!(e, Expr::In(i) if i.select.is_none())
    })
}

/// Wraps a bare select so its rows come back as records of its columns.
fn select_projection(select: &ExprRef) -> Result<ExprRef> {
    let s = select.as_select()?;
    let fields = s
        .columns
        .iter()
        .map(|c| (c.name.clone(), Expr::column(s.alias, c.name.clone(), c.sql_type.clone())))
        .collect();
    Ok(Arc::new(Expr::Projection(ProjectionExpr { select: select.clone(), projector: Expr::record(fields), aggregator: None })))
}

/// Collects a command's parameters in first-use order. Named values carry
/// their own source; variables not declared by the same command become
/// parameters too. Projectors are skipped: their nested queries are
/// separate commands.
#[derive(Default)]
struct ParameterGatherer {
    parameters: IndexMap<String, (SqlType, ValueSource)>,
    declared: HashSet<String>,
}

impl ParameterGatherer {
    fn gather(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Projection(p) => self.gather(&p.select),
            Expr::NamedValue(nv) => {
                if !self.parameters.contains_key(&nv.name) {
                    let source = value_source(&nv.name, &nv.value)?;
                    self.parameters.insert(nv.name.clone(), (nv.sql_type.clone(), source));
                }
                Ok(())
            }
            Expr::Variable(v) => {
                if !self.declared.contains(&v.name) && !self.parameters.contains_key(&v.name) {
                    self.parameters.insert(v.name.clone(), (v.sql_type.clone(), ValueSource::Variable(v.name.clone())));
                }
                Ok(())
            }
            Expr::Declaration(d) => {
                self.declared.extend(d.variables.iter().map(|v| v.name.clone()));
                self.gather(&d.source)
            }
            _ => expr.children().into_iter().try_for_each(|child| self.gather(child)),
        }
    }
}

fn value_source(name: &str, value: &Expr) -> Result<ValueSource> {
    match value {
        Expr::Constant(l) => Ok(ValueSource::Constant(l.to_json())),
        Expr::Member(m) if matches!(m.object.as_ref(), Expr::Parameter(_)) => Ok(ValueSource::ItemMember(m.name.clone())),
        Expr::Column(c) => Ok(ValueSource::OuterColumn(c.name.clone())),
        Expr::Variable(v) => Ok(ValueSource::Variable(v.name.clone())),
        other => Err(QueryError::internal(format!("named value '{name}' has no client source ({})", other.kind_name()))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::_tests::fixtures::northwind_mapping;
    use crate::config::DialectKind;
    use crate::dialect::default_language;
    use crate::mapping::{QueryMapper, WriteKind};
    use crate::policy::{QueryPolice, QueryPolicy};
    use crate::query::{QExpr, Query};

    fn plan_for(dialect: DialectKind, query: &Query, policy: &QueryPolicy) -> ExecutionPlan {
        let mapping = northwind_mapping();
        let language = default_language(dialect);
        let mapper = QueryMapper::new(&mapping, language);
        let mapped = mapper.translate(query.expr()).unwrap();
        let policed = QueryPolice::apply(&mapper, policy, &mapped).unwrap();
        let translated = Linguist::translate(language, &policed).unwrap();
        ExecutionBuilder::build(language, &translated).unwrap()
    }

    fn command_for(dialect: DialectKind, command: impl FnOnce(&QueryMapper<'_>) -> Result<ExprRef>) -> ExecutionPlan {
        let mapping = northwind_mapping();
        let language = default_language(dialect);
        let mapper = QueryMapper::new(&mapping, language);
        let tree = command(&mapper).unwrap();
        let translated = Linguist::translate(language, &tree).unwrap();
        ExecutionBuilder::build(language, &translated).unwrap()
    }

    #[test]
    fn filter_constant_becomes_a_parameter() {
        let q = Query::from("Customer").filter(|c| c.member("City").eq("London"));
        match plan_for(DialectKind::TSql, &q, &QueryPolicy::new()) {
            ExecutionPlan::Query(plan) => {
                assert_eq!(plan.command.command.parameter_names().collect::<Vec<_>>(), vec!["p0"]);
                assert!(plan.command.command.text.contains("@p0"));
                assert_eq!(plan.command.values, vec![ValueSource::Constant(json!("London"))]);
                assert!(plan.aggregator.is_none());
                assert!(matches!(plan.projector, Projector::Record(_)));
            }
            other => panic!("expected query plan, got {other:?}"),
        }
    }

    #[test]
    fn one_to_many_members_become_client_joins() {
        let q = Query::from("Customer").select(|c| QExpr::record([("Name", c.member("Name")), ("Orders", c.member("Orders"))]));
        match plan_for(DialectKind::TSql, &q, &QueryPolicy::new()) {
            ExecutionPlan::Query(plan) => {
                assert_eq!(plan.client_joins.len(), 1);
                assert!(plan.nested.is_empty());
                assert_eq!(plan.client_joins[0].inner_key.len(), 1);
            }
            other => panic!("expected query plan, got {other:?}"),
        }
    }

    #[test]
    fn per_row_nested_queries_read_the_outer_row() {
        let q = Query::from("Customer").select(|c| QExpr::record([("Name", c.member("Name")), ("Orders", c.member("Orders"))]));
        let policy = QueryPolicy::new().with_client_joins(false);
        match plan_for(DialectKind::TSql, &q, &policy) {
            ExecutionPlan::Query(plan) => {
                assert_eq!(plan.nested.len(), 1);
                let nested = &plan.nested[0];
                assert!(nested.command.values.iter().any(|v| matches!(v, ValueSource::OuterColumn(_))));
                assert!(nested.command.command.text.contains("@n0"));
            }
            other => panic!("expected query plan, got {other:?}"),
        }
    }

    #[test]
    fn single_statement_dialects_split_blocks() {
        let plan = command_for(DialectKind::Sqlite, |m| m.insert_returning_id("Employee", &json!({"Name": "Nancy", "Notes": "BA"})));
        match plan {
            ExecutionPlan::Block(plans) => {
                assert_eq!(plans.len(), 4);
                assert!(matches!(plans[1], ExecutionPlan::Declaration { .. }));
                match &plans[2] {
                    ExecutionPlan::Command(c) => assert!(c.values.contains(&ValueSource::Variable("Id".into()))),
                    other => panic!("expected command, got {other:?}"),
                }
                assert!(matches!(plans[3], ExecutionPlan::Query(_)));
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn multi_statement_dialects_send_blocks_at_once() {
        let plan = command_for(DialectKind::TSql, |m| m.insert_returning_id("Employee", &json!({"Name": "Nancy", "Notes": "BA"})));
        match plan {
            ExecutionPlan::Query(q) => {
                assert!(q.command.command.text.contains("DECLARE @Id"));
                assert!(q.command.values.iter().all(|v| !matches!(v, ValueSource::Variable(_))));
                assert_eq!(q.aggregator, Some(ElementKind::Single));
            }
            other => panic!("expected query plan, got {other:?}"),
        }
    }

    #[test]
    fn upsert_checks_on_the_client_without_multi_statement_support() {
        let plan = command_for(DialectKind::MySql, |m| m.upsert("Customer", &json!({"Id": 1, "Name": "A", "City": "B"})));
        match plan {
            ExecutionPlan::If { check, if_false, .. } => {
                assert!(check.command.command.text.contains("SELECT"));
                assert!(if_false.is_some());
            }
            other => panic!("expected if plan, got {other:?}"),
        }
    }

    #[test]
    fn batch_values_come_from_the_item() {
        let plan = command_for(DialectKind::TSql, |m| m.batch("Customer", WriteKind::Delete, vec![json!({"Id": 1})], 10));
        match plan {
            ExecutionPlan::Batch { operation, items, batch_size } => {
                assert_eq!(items.len(), 1);
                assert_eq!(batch_size, 10);
                match *operation {
                    ExecutionPlan::Command(c) => assert_eq!(c.values, vec![ValueSource::ItemMember("Id".into())]),
                    other => panic!("expected command, got {other:?}"),
                }
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }
}
