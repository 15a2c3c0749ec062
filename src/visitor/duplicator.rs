use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::{ColumnExpr, Expr, ExprRef, SelectExpr, TableAlias, TableExpr};
use crate::visitor::{Rewriter, walk_select};

/// Copy a tree giving every declared source a fresh alias. Columns that
/// read from a renamed source follow it; outer references are untouched.
#[derive(Default)]
pub struct QueryDuplicator {
    map: HashMap<TableAlias, TableAlias>,
}

impl QueryDuplicator {
    pub fn duplicate(expr: &ExprRef) -> Result<ExprRef> {
        QueryDuplicator::default().visit(expr)
    }

    /// Duplicate and also report old-to-new alias pairs.
    pub fn duplicate_with_map(expr: &ExprRef) -> Result<(ExprRef, HashMap<TableAlias, TableAlias>)> {
        let mut dup = QueryDuplicator::default();
        let out = dup.visit(expr)?;
        Ok((out, dup.map))
    }
}

impl Rewriter for QueryDuplicator {
    fn visit_table(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Table(t) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        let alias = TableAlias::new();
        self.map.insert(t.alias, alias);
        Ok(Arc::new(Expr::Table(TableExpr { alias, ..t.clone() })))
    }

    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        let alias = TableAlias::new();
        self.map.insert(s.alias, alias);
        let walked = walk_select(self, expr, s)?;
        let inner = walked.as_select()?;
        Ok(SelectExpr { alias, ..inner.clone() }.into_expr())
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Column(c) => match c.alias.and_then(|a| self.map.get(&a)) {
                Some(&alias) => Ok(Arc::new(Expr::Column(ColumnExpr { alias: Some(alias), ..c.clone() }))),
                None => Ok(expr.clone()),
            },
            _ => Ok(expr.clone()),
        }
    }
}
