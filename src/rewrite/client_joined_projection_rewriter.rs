use std::sync::Arc;

use tracing::warn;

use crate::binder::{ColumnProjector, OuterJoinTest};
use crate::error::Result;
use crate::expr::*;
use crate::policy::QueryPolicy;
use crate::visitor::{walk, AggregateChecker, ColumnMapper, QueryDuplicator, ReferencedAliasGatherer, Rewriter};

/// Replaces a nested projection that would run once per outer row with a
/// single joined query whose rows are matched to their parents on the
/// client by key.
///
/// Only projections reached through a member (an entity or record field)
/// are joined; deferred members, distinct or grouped inner queries, and
/// anything nested below a projection that could not be joined keep the
/// per-row form.
pub struct ClientJoinedProjectionRewriter<'p> {
    policy: &'p QueryPolicy,
    is_top_level: bool,
    current_select: Option<ExprRef>,
    current_member: Option<(Option<String>, String)>,
    can_join_on_client: bool,
}

/// Equality pairs relating an inner query to its outer alias.
#[derive(Default)]
struct EquiJoinKeys {
    outer: Vec<ExprRef>,
    inner: Vec<ExprRef>,
}

impl<'p> ClientJoinedProjectionRewriter<'p> {
    pub fn rewrite(policy: &'p QueryPolicy, expr: &ExprRef) -> Result<ExprRef> {
        ClientJoinedProjectionRewriter {
            policy,
            is_top_level: true,
            current_select: None,
            current_member: None,
            can_join_on_client: policy.client_joins(),
        }
        .visit(expr)
    }

    fn can_join_on_client(&self, select: &ExprRef) -> bool {
        let Some((entity, member)) = &self.current_member else {
            return false;
        };
        let deferred = entity.as_deref().is_some_and(|e| self.policy.is_deferred(e, member));
        let Expr::Select(s) = select.as_ref() else {
            return false;
        };
        self.can_join_on_client && !deferred && !s.distinct && !s.has_group_by() && !AggregateChecker::has_aggregates(select)
    }

    fn with_member(&mut self, member: (Option<String>, String), expr: &ExprRef) -> Result<ExprRef> {
        let saved = self.current_member.replace(member);
        let result = self.visit(expr);
        self.current_member = saved;
        result
    }

    /// Collect `outer = inner` column pairs from a predicate. Every conjunct
    /// that touches the outer alias has to be such a pair.
    fn equi_join_keys(predicate: &ExprRef, outer_alias: TableAlias, keys: &mut EquiJoinKeys) -> bool {
        if let Expr::Binary(b) = predicate.as_ref() {
            if b.op == BinaryOp::Equal {
                if let (Some(l), Some(r)) = (b.left.as_column(), b.right.as_column()) {
                    if l.alias == Some(outer_alias) {
                        keys.outer.push(b.left.clone());
                        keys.inner.push(b.right.clone());
                        return true;
                    }
                    if r.alias == Some(outer_alias) {
                        keys.inner.push(b.left.clone());
                        keys.outer.push(b.right.clone());
                        return true;
                    }
                }
            }
        }
        let parts = Expr::split_and(predicate);
        if parts.len() < 2 {
            return false;
        }
        let mut had_key = false;
        for part in &parts {
            if ReferencedAliasGatherer::gather(part).contains(&outer_alias) {
                if !Self::equi_join_keys(part, outer_alias, keys) {
                    return false;
                }
                had_key = true;
            }
        }
        had_key
    }

    fn client_join(&mut self, outer: &ExprRef, projection: &ProjectionExpr) -> Result<Option<ExprRef>> {
        let outer_alias = outer.as_select()?.alias;
        let new_outer = QueryDuplicator::duplicate(outer)?;
        let new_outer_alias = new_outer.as_select()?.alias;
        let inner = ColumnMapper::map(&projection.select, new_outer_alias, [outer_alias])?;
        let inner_select = inner.as_select()?;

        let mut keys = EquiJoinKeys::default();
        let has_keys = inner_select
            .where_
            .as_ref()
            .is_some_and(|w| Self::equi_join_keys(w, new_outer_alias, &mut keys));
        if !has_keys {
            warn!(alias = %inner_select.alias, "nested projection has no equi-join keys; leaving it per row");
            return Ok(None);
        }

        // inner keys must survive as columns of the inner select
        let mut inner_select = inner_select.clone();
        let mut inner_key_names = Vec::with_capacity(keys.inner.len());
        for key in &keys.inner {
            let existing = inner_select
                .columns
                .iter()
                .find(|c| matches!((c.expr.as_column(), key.as_column()), (Some(a), Some(b)) if a == b))
                .map(|c| c.name.clone());
            let name = match existing {
                Some(name) => name,
                None => {
                    let base = key.as_column().map(|c| c.name.clone()).unwrap_or_else(|| "key".to_string());
                    let name = available_column_name(&inner_select.columns, &base);
                    inner_select = inner_select.add_column(ColumnDeclaration::new(name.clone(), key.clone(), TypeInference::sql_type_of(key)));
                    name
                }
            };
            inner_key_names.push(name);
        }

        let tested = OuterJoinTest::add(&ProjectionExpr {
            select: inner_select.into_expr(),
            projector: projection.projector.clone(),
            aggregator: projection.aggregator,
        })?;
        let tested_select = tested.select()?.clone();

        let new_alias = TableAlias::new();
        let pc = ColumnProjector::project(&tested.projector, new_alias, &[new_outer_alias, tested_select.alias])?;
        let mut columns = pc.columns;
        let mut inner_key = Vec::with_capacity(inner_key_names.len());
        for name in &inner_key_names {
            let sql_type = tested_select.column(name).map(|c| c.sql_type.clone()).unwrap_or_default();
            let source = Expr::column(tested_select.alias, name.clone(), sql_type.clone());
            let declared = columns
                .iter()
                .find(|c| matches!((c.expr.as_column(), source.as_column()), (Some(a), Some(b)) if a == b))
                .map(|c| c.name.clone());
            let joined_name = match declared {
                Some(n) => n,
                None => {
                    let n = available_column_name(&columns, name);
                    columns.push(ColumnDeclaration::new(n.clone(), source, sql_type.clone()));
                    n
                }
            };
            inner_key.push(Expr::column(new_alias, joined_name, sql_type));
        }

        let join = Expr::join(JoinKind::OuterApply, new_outer, tested_select.into_expr(), None);
        let joined = SelectExpr::new(new_alias, columns, Some(join), None).with_distinct(projection.is_singleton()).into_expr();

        let saved = self.current_select.replace(joined.clone());
        let projector = self.visit(&pc.projector);
        self.current_select = saved;
        let projector = projector?;

        let outer_key = keys
            .outer
            .iter()
            .map(|k| ColumnMapper::map(k, outer_alias, [new_outer_alias]))
            .collect::<Result<Vec<_>>>()?;
        let joined_projection = Arc::new(Expr::Projection(ProjectionExpr { select: joined, projector, aggregator: projection.aggregator }));
        Ok(Some(Arc::new(Expr::ClientJoin(ClientJoinExpr { projection: joined_projection, outer_key, inner_key }))))
    }
}

impl Rewriter for ClientJoinedProjectionRewriter<'_> {
    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let saved = self.current_select.replace(p.select.clone());
        let result = (|| {
            if self.is_top_level {
                self.is_top_level = false;
                return walk(self, expr);
            }
            match &saved {
                Some(outer) if self.can_join_on_client(&p.select) => {
                    if let Some(joined) = self.client_join(outer, p)? {
                        return Ok(joined);
                    }
                    walk(self, expr)
                }
                _ => {
                    let saved_join = std::mem::replace(&mut self.can_join_on_client, false);
                    let result = walk(self, expr);
                    self.can_join_on_client = saved_join;
                    result
                }
            }
        })();
        self.current_select = saved;
        result
    }

    fn visit_entity(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Entity(e) = expr.as_ref() else {
            return walk(self, expr);
        };
        let Expr::Record(r) = e.expr.as_ref() else {
            return walk(self, expr);
        };
        let fields = self.visit_fields(Some(&e.entity), r)?;
        match fields {
            Some(fields) => Ok(Arc::new(Expr::Entity(EntityExpr { entity: e.entity.clone(), expr: fields }))),
            None => Ok(expr.clone()),
        }
    }

    fn visit_record(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Record(r) = expr.as_ref() else {
            return walk(self, expr);
        };
        Ok(self.visit_fields(None, r)?.unwrap_or_else(|| expr.clone()))
    }

    fn visit_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_command(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.is_top_level = true;
        walk(self, expr)
    }
}

impl ClientJoinedProjectionRewriter<'_> {
    /// Visit each field with it as the current member; `None` when nothing
    /// changed.
    fn visit_fields(&mut self, entity: Option<&str>, record: &RecordExpr) -> Result<Option<ExprRef>> {
        let mut changed = false;
        let mut fields = Vec::with_capacity(record.fields.len());
        for (name, value) in &record.fields {
            let visited = self.with_member((entity.map(str::to_string), name.clone()), value)?;
            changed |= !same(&visited, value);
            fields.push((name.clone(), visited));
        }
        Ok(changed.then(|| Expr::record(fields)))
    }
}
