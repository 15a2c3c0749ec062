use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{walk, walk_select, DeclaredAliasGatherer, ReferencedColumnGatherer, Rewriter};

/// Wraps a join in its own select whenever cross joins and other joins
/// meet in one chain, for dialects that cannot mix the comma syntax with
/// explicit joins.
#[derive(Default)]
pub struct CrossJoinIsolator {
    columns: IndexSet<ColumnExpr>,
    map: HashMap<ColumnExpr, ExprRef>,
    last_join: Option<JoinKind>,
}

impl CrossJoinIsolator {
    pub fn isolate(expr: &ExprRef) -> Result<ExprRef> {
        CrossJoinIsolator::default().visit(expr)
    }

    fn make_subquery(&mut self, join: ExprRef) -> ExprRef {
        let new_alias = TableAlias::new();
        let mut aliases: Vec<TableAlias> = DeclaredAliasGatherer::gather(&join).into_iter().collect();
        aliases.sort();
        let mut declarations: Vec<ColumnDeclaration> = Vec::new();
        for alias in aliases {
            for column in self.columns.iter().filter(|c| c.alias == Some(alias)) {
                let name = available_column_name(&declarations, &column.name);
                let original = Arc::new(Expr::Column(column.clone()));
                declarations.push(ColumnDeclaration::new(name.clone(), original, column.sql_type.clone()));
                self.map.insert(column.clone(), Expr::column(new_alias, name, column.sql_type.clone()));
            }
        }
        SelectExpr::new(new_alias, declarations, Some(join), None).into_expr()
    }
}

impl Rewriter for CrossJoinIsolator {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let saved_columns = std::mem::replace(&mut self.columns, ReferencedColumnGatherer::gather(expr));
        let saved_join = self.last_join.take();
        let result = walk_select(self, expr, s);
        self.columns = saved_columns;
        self.last_join = saved_join;
        result
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Join(j) = expr.as_ref() else {
            return walk(self, expr);
        };
        let saved = self.last_join.replace(j.kind);
        let visited = walk(self, expr);
        self.last_join = saved;
        let visited = visited?;
        match saved {
            Some(outer) if (j.kind == JoinKind::CrossJoin) != (outer == JoinKind::CrossJoin) => Ok(self.make_subquery(visited)),
            _ => Ok(visited),
        }
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Column(c) => Ok(self.map.get(c).cloned().unwrap_or_else(|| expr.clone())),
            _ => Ok(expr.clone()),
        }
    }
}
