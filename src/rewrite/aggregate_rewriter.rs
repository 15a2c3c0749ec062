use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{walk, walk_select, Rewriter};

/// Moves aggregates over a group's elements into the select that does the
/// grouping. Each `AggregateSubquery` becomes an `aggN` column of the
/// grouping select; anything that cannot be moved falls back to its
/// correlated subquery form.
pub struct AggregateRewriter {
    by_alias: HashMap<TableAlias, Vec<ExprRef>>,
    map: HashMap<*const Expr, ExprRef>,
}

impl AggregateRewriter {
    pub fn rewrite(expr: &ExprRef) -> Result<ExprRef> {
        let mut by_alias: HashMap<TableAlias, Vec<ExprRef>> = HashMap::new();
        gather(expr, &mut by_alias);
        if by_alias.is_empty() {
            return Ok(expr.clone());
        }
        AggregateRewriter { by_alias, map: HashMap::new() }.visit(expr)
    }
}

fn gather(expr: &ExprRef, out: &mut HashMap<TableAlias, Vec<ExprRef>>) {
    if let Expr::AggregateSubquery(a) = expr.as_ref() {
        out.entry(a.group_by_alias).or_default().push(expr.clone());
    }
    for child in expr.children() {
        gather(child, out);
    }
}

impl Rewriter for AggregateRewriter {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk_select(self, expr, s)?;
        let Some(aggregates) = self.by_alias.get(&s.alias) else {
            return Ok(visited);
        };
        let select = visited.as_select()?;
        let mut columns = select.columns.clone();
        for node in aggregates {
            let Expr::AggregateSubquery(a) = node.as_ref() else {
                continue;
            };
            let name = available_column_name(&columns, &format!("agg{}", columns.len()));
            let sql_type = TypeInference::sql_type_of(&a.aggregate_in_group_select);
            columns.push(ColumnDeclaration::new(name.clone(), a.aggregate_in_group_select.clone(), sql_type.clone()));
            self.map.insert(Arc::as_ptr(node), Expr::column(a.group_by_alias, name, sql_type));
        }
        Ok(select.with_columns(columns).into_expr())
    }

    fn visit_aggregate_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if let Some(mapped) = self.map.get(&Arc::as_ptr(expr)) {
            return Ok(mapped.clone());
        }
        match expr.as_ref() {
            Expr::AggregateSubquery(a) => self.visit(&a.subquery),
            _ => walk(self, expr),
        }
    }
}
