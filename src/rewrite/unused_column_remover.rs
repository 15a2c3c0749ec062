use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{visit_list, visit_opt, visit_order_by, same_columns, same_order_by, walk, Rewriter};

/// Drops select columns nobody reads, and singleton left outer joins whose
/// right side is no longer referenced.
///
/// Columns are marked used while walking outside-in: a projection's
/// projector before its select, a select's columns before its clauses, the
/// clauses before the FROM. A bare select at the root keeps its columns.
pub struct UnusedColumnRemover {
    used: HashMap<TableAlias, HashSet<String>>,
    retain_all: bool,
}

impl UnusedColumnRemover {
    pub fn remove(expr: &ExprRef) -> Result<ExprRef> {
        UnusedColumnRemover { used: HashMap::new(), retain_all: true }.visit(expr)
    }

    fn mark_used(&mut self, alias: TableAlias, name: &str) {
        self.used.entry(alias).or_default().insert(name.to_string());
    }

    fn is_used(&self, alias: TableAlias, name: &str) -> bool {
        self.used.get(&alias).is_some_and(|names| names.contains(name))
    }
}

impl Rewriter for UnusedColumnRemover {
    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if let Expr::Column(ColumnExpr { alias: Some(alias), name, .. }) = expr.as_ref() {
            self.mark_used(*alias, name);
        }
        Ok(expr.clone())
    }

    fn visit_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let select = match expr.as_ref() {
            Expr::Scalar(s) => Some(s),
            Expr::In(i) => i.select.as_ref(),
            _ => None,
        };
        if let Some(Expr::Select(s)) = select.map(|s| s.as_ref()) {
            if let Some(first) = s.columns.first() {
                let name = first.name.clone();
                self.mark_used(s.alias, &name);
            }
        }
        walk(self, expr)
    }

    fn visit_aggregate(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        // COUNT(*) reads every row of its source, so nothing below may narrow
        if let Expr::Aggregate(AggregateExpr { kind: AggregateKind::Count, argument: None, .. }) = expr.as_ref() {
            self.retain_all = true;
        }
        walk(self, expr)
    }

    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let was_retained = std::mem::replace(&mut self.retain_all, false);

        let mut columns = Vec::with_capacity(s.columns.len());
        for decl in &s.columns {
            if was_retained || s.distinct || self.is_used(s.alias, &decl.name) {
                let visited = self.visit(&decl.expr)?;
                columns.push(ColumnDeclaration::new(decl.name.clone(), visited, decl.sql_type.clone()));
            }
        }
        let take = visit_opt(self, &s.take)?;
        let skip = visit_opt(self, &s.skip)?;
        let group_by = visit_list(self, &s.group_by)?;
        let order_by = visit_order_by(self, &s.order_by)?;
        let where_ = visit_opt(self, &s.where_)?;
        let from = visit_opt(self, &s.from)?;

        self.used.remove(&s.alias);
        self.retain_all = was_retained;

        if same_columns(&columns, &s.columns)
            && same_opt(&take, &s.take)
            && same_opt(&skip, &s.skip)
            && same_list(&group_by, &s.group_by)
            && same_order_by(&order_by, &s.order_by)
            && same_opt(&where_, &s.where_)
            && same_opt(&from, &s.from)
        {
            return Ok(expr.clone());
        }
        Ok(SelectExpr { alias: s.alias, columns, from, where_, order_by, group_by, distinct: s.distinct, reverse: s.reverse, skip, take }
            .into_expr())
    }

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let projector = self.visit(&p.projector)?;
        let was_retained = std::mem::replace(&mut self.retain_all, false);
        let select = self.visit(&p.select);
        self.retain_all = was_retained;
        let select = select?;
        if same(&projector, &p.projector) && same(&select, &p.select) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Projection(ProjectionExpr { select, projector, aggregator: p.aggregator })))
    }

    fn visit_client_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::ClientJoin(c) = expr.as_ref() else {
            return walk(self, expr);
        };
        let inner_key = visit_list(self, &c.inner_key)?;
        let outer_key = visit_list(self, &c.outer_key)?;
        let projection = self.visit(&c.projection)?;
        if same_list(&inner_key, &c.inner_key) && same_list(&outer_key, &c.outer_key) && same(&projection, &c.projection) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::ClientJoin(ClientJoinExpr { projection, outer_key, inner_key })))
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Join(j) = expr.as_ref() else {
            return walk(self, expr);
        };
        if j.kind == JoinKind::SingletonLeftOuter {
            if let Some(alias) = j.right.declared_alias() {
                if !self.used.contains_key(&alias) {
                    return self.visit(&j.left);
                }
            }
        }
        let condition = visit_opt(self, &j.condition)?;
        let right = self.visit(&j.right)?;
        let left = self.visit(&j.left)?;
        if same(&left, &j.left) && same(&right, &j.right) && same_opt(&condition, &j.condition) {
            return Ok(expr.clone());
        }
        Ok(Expr::join(j.kind, left, right, condition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: name.into(), name: name.into() })))
    }

    fn decl(alias: TableAlias, name: &str) -> ColumnDeclaration {
        ColumnDeclaration::new(name, Expr::column(alias, name, SqlType::int()), SqlType::int())
    }

    #[test]
    fn unread_inner_columns_are_dropped() {
        let (ta, t) = table("Customers");
        let inner = SelectExpr::new(TableAlias::new(), vec![decl(ta, "A"), decl(ta, "B")], Some(t), None);
        let outer = SelectExpr::new(TableAlias::new(), vec![decl(inner.alias, "A")], Some(inner.into_expr()), None).into_expr();
        let out = UnusedColumnRemover::remove(&outer).unwrap();
        let inner = out.as_select().unwrap().from.as_ref().unwrap().as_select().unwrap();
        assert_eq!(inner.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn count_star_and_distinct_retain_columns() {
        let (ta, t) = table("Customers");
        let inner = SelectExpr::new(TableAlias::new(), vec![decl(ta, "A"), decl(ta, "B")], Some(t), None).with_distinct(true);
        let count = Arc::new(Expr::Aggregate(AggregateExpr { kind: AggregateKind::Count, argument: None, distinct: false }));
        let outer = SelectExpr::new(TableAlias::new(), vec![ColumnDeclaration::new("value", count, SqlType::int())], Some(inner.into_expr()), None)
            .into_expr();
        let out = UnusedColumnRemover::remove(&outer).unwrap();
        assert!(same(&out, &outer));
    }

    #[test]
    fn unreferenced_singleton_left_outer_join_is_removed() {
        let (ta, t) = table("Employees");
        let (tb, ext) = table("EmployeeDetails");
        let join = Expr::join(
            JoinKind::SingletonLeftOuter,
            t,
            ext,
            Some(Expr::equal(Expr::column(tb, "EmployeeId", SqlType::int()), Expr::column(ta, "Id", SqlType::int()))),
        );
        let select = SelectExpr::new(TableAlias::new(), vec![decl(ta, "Id")], Some(join), None).into_expr();
        let out = UnusedColumnRemover::remove(&select).unwrap();
        assert!(matches!(out.as_select().unwrap().from.as_deref(), Some(Expr::Table(_))));
    }

    #[test]
    fn removal_is_idempotent() {
        let (ta, t) = table("Customers");
        let inner = SelectExpr::new(TableAlias::new(), vec![decl(ta, "A"), decl(ta, "B")], Some(t), None);
        let outer = SelectExpr::new(TableAlias::new(), vec![decl(inner.alias, "B")], Some(inner.into_expr()), None).into_expr();
        let once = UnusedColumnRemover::remove(&outer).unwrap();
        let twice = UnusedColumnRemover::remove(&once).unwrap();
        assert!(same(&once, &twice));
    }
}
