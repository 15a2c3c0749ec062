use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::visitor::{walk, walk_select, AggregateChecker, Rewriter};

/// Removes selects that only pass their source through, then merges
/// selects into the leftmost select of their FROM where the combined
/// clauses mean the same thing.
pub struct RedundantSubqueryRemover;

impl RedundantSubqueryRemover {
    pub fn remove(expr: &ExprRef) -> Result<ExprRef> {
        let expr = RedundantSubqueryRemover.visit(expr)?;
        SubqueryMerger::merge(&expr)
    }
}

impl Rewriter for RedundantSubqueryRemover {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk_select(self, expr, s)?;
        let select = visited.as_select()?;
        let redundant = match &select.from {
            Some(from) => RedundantSubqueryGatherer::gather(from),
            None => Vec::new(),
        };
        if redundant.is_empty() {
            return Ok(visited);
        }
        SubqueryRemover::remove(&visited, &redundant)
    }

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let visited = walk(self, expr)?;
        let Expr::Projection(p) = visited.as_ref() else {
            return Ok(visited);
        };
        if !matches!(p.select()?.from.as_deref(), Some(Expr::Select(_))) {
            return Ok(visited);
        }
        let redundant = RedundantSubqueryGatherer::gather(&p.select);
        if redundant.is_empty() {
            return Ok(visited);
        }
        SubqueryRemover::remove(&visited, &redundant)
    }
}

pub(crate) fn is_redundant_subquery(select: &SelectExpr) -> bool {
    (is_simple_projection(select) || is_name_map_projection(select))
        && !select.distinct
        && !select.reverse
        && select.take.is_none()
        && select.skip.is_none()
        && select.where_.is_none()
        && select.order_by.is_empty()
        && select.group_by.is_empty()
}

fn is_simple_projection(select: &SelectExpr) -> bool {
    select
        .columns
        .iter()
        .all(|d| d.expr.as_column().is_some_and(|c| c.name == d.name))
}

/// Every column re-exposes the column at the same position of the FROM
/// select under its name.
pub(crate) fn is_name_map_projection(select: &SelectExpr) -> bool {
    let Some(Expr::Select(from)) = select.from.as_deref() else {
        return false;
    };
    from.columns.len() == select.columns.len()
        && select
            .columns
            .iter()
            .zip(&from.columns)
            .all(|(d, f)| d.expr.as_column().is_some_and(|c| c.name == f.name))
}

/// Redundant selects reachable through the FROM/JOIN chain of a source.
struct RedundantSubqueryGatherer;

impl RedundantSubqueryGatherer {
    fn gather(source: &ExprRef) -> Vec<ExprRef> {
        let mut out = Vec::new();
        Self::collect(source, &mut out);
        out
    }

    fn collect(source: &ExprRef, out: &mut Vec<ExprRef>) {
        match source.as_ref() {
            Expr::Select(s) if is_redundant_subquery(s) => out.push(source.clone()),
            Expr::Join(j) => {
                Self::collect(&j.left, out);
                Self::collect(&j.right, out);
            }
            _ => {}
        }
    }
}

/// Splices the given selects out of a tree, replacing references to their
/// columns with the expressions those columns declared.
pub(crate) struct SubqueryRemover {
    to_remove: HashSet<*const Expr>,
    map: HashMap<TableAlias, HashMap<String, ExprRef>>,
}

impl SubqueryRemover {
    pub(crate) fn remove(expr: &ExprRef, selects: &[ExprRef]) -> Result<ExprRef> {
        let mut map = HashMap::new();
        for select in selects {
            let s = select.as_select()?;
            let names = s.columns.iter().map(|d| (d.name.clone(), d.expr.clone())).collect();
            map.insert(s.alias, names);
        }
        let to_remove = selects.iter().map(Arc::as_ptr).collect();
        SubqueryRemover { to_remove, map }.visit(expr)
    }
}

impl Rewriter for SubqueryRemover {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        if self.to_remove.contains(&Arc::as_ptr(expr)) {
            return match &s.from {
                Some(from) => self.visit(from),
                None => Err(QueryError::internal("cannot remove a select without a source")),
            };
        }
        walk_select(self, expr, s)
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Column(c) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        let Some(names) = c.alias.and_then(|a| self.map.get(&a)) else {
            return Ok(expr.clone());
        };
        match names.get(&c.name) {
            Some(mapped) => {
                let mapped = mapped.clone();
                self.visit(&mapped)
            }
            None => Err(QueryError::internal(format!("reference to undefined column {}", c.name))),
        }
    }
}

/// Folds a select into the leftmost select of its FROM when the two can be
/// expressed as a single level.
struct SubqueryMerger {
    is_top_level: bool,
}

impl SubqueryMerger {
    fn merge(expr: &ExprRef) -> Result<ExprRef> {
        SubqueryMerger { is_top_level: true }.visit(expr)
    }
}

fn left_most_select(source: &ExprRef) -> Option<ExprRef> {
    match source.as_ref() {
        Expr::Select(_) => Some(source.clone()),
        Expr::Join(j) => left_most_select(&j.left),
        _ => None,
    }
}

fn is_column_projection(select: &SelectExpr) -> bool {
    select
        .columns
        .iter()
        .all(|d| matches!(d.expr.as_ref(), Expr::Column(_) | Expr::Constant(_)))
}

fn can_merge_with_from(expr: &ExprRef, is_top_level: bool) -> Result<Option<ExprRef>> {
    let select = expr.as_select()?;
    let Some(from_ref) = select.from.as_ref().and_then(left_most_select) else {
        return Ok(None);
    };
    let from = from_ref.as_select()?;
    if !is_column_projection(from) {
        return Ok(None);
    }
    let sel_name_map = is_name_map_projection(select);
    let sel_order = select.has_order_by();
    let sel_group = select.has_group_by();
    let sel_aggregates = AggregateChecker::has_aggregates(expr);
    let sel_join = matches!(select.from.as_deref(), Some(Expr::Join(_)));
    let from_order = from.has_order_by();
    let from_group = from.has_group_by();
    let from_aggregates = AggregateChecker::has_aggregates(&from_ref);
    let sel_paged = select.take.is_some() || select.skip.is_some();

    let blocked = (sel_order && from_order)
        || (sel_group && from_group)
        || select.reverse
        || from.reverse
        || (from_order && (sel_group || sel_aggregates || select.distinct))
        || from_group
        || (from.take.is_some() && (sel_paged || select.distinct || sel_aggregates || sel_group || sel_join))
        || (from.skip.is_some() && (select.skip.is_some() || select.distinct || sel_aggregates || sel_group || sel_join))
        || (from.distinct
            && (sel_paged || !sel_name_map || sel_group || sel_aggregates || (sel_order && !is_top_level) || sel_join))
        || (from_aggregates && (sel_paged || select.distinct || sel_aggregates || sel_group || sel_join));
    Ok((!blocked).then_some(from_ref))
}

impl Rewriter for SubqueryMerger {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let was_top_level = std::mem::replace(&mut self.is_top_level, false);
        let mut current = walk_select(self, expr, s)?;

        while let Some(from_ref) = can_merge_with_from(&current, was_top_level)? {
            let from = from_ref.as_select()?.clone();
            let removed = SubqueryRemover::remove(&current, &[from_ref])?;
            let select = removed.as_select()?;
            let where_ = match (&from.where_, &select.where_) {
                (Some(inner), Some(outer)) => Some(Expr::and(inner.clone(), outer.clone())),
                (inner, outer) => outer.clone().or_else(|| inner.clone()),
            };
            current = SelectExpr {
                alias: select.alias,
                columns: select.columns.clone(),
                from: select.from.clone(),
                where_,
                order_by: if select.has_order_by() { select.order_by.clone() } else { from.order_by.clone() },
                group_by: if select.has_group_by() { select.group_by.clone() } else { from.group_by.clone() },
                distinct: select.distinct || from.distinct,
                reverse: select.reverse,
                skip: select.skip.clone().or_else(|| from.skip.clone()),
                take: select.take.clone().or_else(|| from.take.clone()),
            }
            .into_expr();
        }
        Ok(current)
    }
}
