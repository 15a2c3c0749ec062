use std::collections::HashMap;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{walk, walk_select, Rewriter};

/// Collapses select columns that compute the same thing, re-pointing
/// references to the dropped names at the surviving declaration.
#[derive(Default)]
pub struct RedundantColumnRemover {
    map: HashMap<ColumnExpr, ExprRef>,
}

impl RedundantColumnRemover {
    pub fn remove(expr: &ExprRef) -> Result<ExprRef> {
        RedundantColumnRemover::default().visit(expr)
    }
}

fn same_value(a: &ExprRef, b: &ExprRef) -> bool {
    if same(a, b) {
        return true;
    }
    match (a.as_column(), b.as_column()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl Rewriter for RedundantColumnRemover {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk_select(self, expr, s)?;
        let select = visited.as_select()?;

        let mut kept: Vec<ColumnDeclaration> = Vec::with_capacity(select.columns.len());
        let mut removed = false;
        for decl in &select.columns {
            match kept.iter().find(|k| same_value(&k.expr, &decl.expr)) {
                Some(survivor) => {
                    let dropped = ColumnExpr { alias: Some(select.alias), name: decl.name.clone(), sql_type: decl.sql_type.clone() };
                    self.map.insert(dropped, Expr::column(select.alias, survivor.name.clone(), survivor.sql_type.clone()));
                    removed = true;
                }
                None => kept.push(decl.clone()),
            }
        }
        if !removed {
            return Ok(visited);
        }
        Ok(select.with_columns(kept).into_expr())
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Column(c) => Ok(self.map.get(c).cloned().unwrap_or_else(|| expr.clone())),
            _ => Ok(expr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn duplicate_columns_collapse_onto_the_first() {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Order".into(), name: "Orders".into() }));
        let inner = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDeclaration::new("Id", Expr::column(ta, "Id", SqlType::int()), SqlType::int()),
                ColumnDeclaration::new("Id1", Expr::column(ta, "Id", SqlType::int()), SqlType::int()),
            ],
            Some(table),
            None,
        );
        let ia = inner.alias;
        let outer = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("X", Expr::column(ia, "Id1", SqlType::int()), SqlType::int())],
            Some(inner.into_expr()),
            None,
        )
        .into_expr();

        let out = RedundantColumnRemover::remove(&outer).unwrap();
        let outer = out.as_select().unwrap();
        let inner = outer.from.as_ref().unwrap().as_select().unwrap();
        assert_eq!(inner.columns.len(), 1);
        assert_eq!(outer.columns[0].expr.as_column().map(|c| c.name.as_str()), Some("Id"));
    }

    #[test]
    fn distinct_columns_are_untouched() {
        let ta = TableAlias::new();
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDeclaration::new("A", Expr::column(ta, "A", SqlType::int()), SqlType::int()),
                ColumnDeclaration::new("B", Expr::column(ta, "B", SqlType::int()), SqlType::int()),
            ],
            None,
            None,
        )
        .into_expr();
        assert!(same(&RedundantColumnRemover::remove(&select).unwrap(), &select));
    }
}
