use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{walk, ExprComparer, Rewriter};

/// Drops a join whose right side repeats a source already joined on the
/// left with an equivalent condition. References to the dropped alias are
/// re-pointed at the surviving one.
#[derive(Default)]
pub struct RedundantJoinRemover {
    map: HashMap<TableAlias, TableAlias>,
}

impl RedundantJoinRemover {
    pub fn remove(expr: &ExprRef) -> Result<ExprRef> {
        RedundantJoinRemover::default().visit(expr)
    }
}

fn similar_right(source: &ExprRef, kind: JoinKind, right: &ExprRef, condition: &Option<ExprRef>) -> Option<TableAlias> {
    let Expr::Join(j) = source.as_ref() else {
        return None;
    };
    if j.kind == kind && ExprComparer::are_equal(&j.right, right) {
        let (Some(a), Some(b)) = (right.declared_alias(), j.right.declared_alias()) else {
            return None;
        };
        let conditions_match = match (condition, &j.condition) {
            (None, None) => true,
            (Some(x), Some(y)) => same(x, y) || ExprComparer::are_equal_with(x, y, [(a, b)]),
            _ => false,
        };
        if conditions_match {
            return Some(b);
        }
    }
    similar_right(&j.left, kind, right, condition).or_else(|| similar_right(&j.right, kind, right, condition))
}

impl Rewriter for RedundantJoinRemover {
    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let visited = walk(self, expr)?;
        let Expr::Join(j) = visited.as_ref() else {
            return Ok(visited);
        };
        if let (Some(alias), Some(similar)) =
            (j.right.declared_alias(), similar_right(&j.left, j.kind, &j.right, &j.condition))
        {
            self.map.insert(alias, similar);
            return Ok(j.left.clone());
        }
        Ok(visited)
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Column(c) => match c.alias.and_then(|a| self.map.get(&a)) {
                Some(mapped) => Ok(Arc::new(Expr::Column(ColumnExpr { alias: Some(*mapped), ..c.clone() }))),
                None => Ok(expr.clone()),
            },
            _ => Ok(expr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(alias: TableAlias) -> ExprRef {
        Arc::new(Expr::Table(TableExpr { alias, entity: "Customer".into(), name: "Customers".into() }))
    }

    #[test]
    fn repeated_outer_apply_is_dropped() {
        let oa = TableAlias::new();
        let orders = Arc::new(Expr::Table(TableExpr { alias: oa, entity: "Order".into(), name: "Orders".into() }));
        let (c1, c2) = (TableAlias::new(), TableAlias::new());
        let cond = |c| Expr::equal(Expr::column(c, "Id", SqlType::int()), Expr::column(oa, "CustomerId", SqlType::int()));
        let first = Expr::join(JoinKind::LeftOuter, orders, table(c1), Some(cond(c1)));
        let second = Expr::join(JoinKind::LeftOuter, first.clone(), table(c2), Some(cond(c2)));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDeclaration::new("A", Expr::column(c1, "Name", SqlType::nvarchar(40)), SqlType::nvarchar(40)),
                ColumnDeclaration::new("B", Expr::column(c2, "City", SqlType::nvarchar(40)), SqlType::nvarchar(40)),
            ],
            Some(second),
            None,
        )
        .into_expr();

        let out = RedundantJoinRemover::remove(&select).unwrap();
        let s = out.as_select().unwrap();
        assert!(same(s.from.as_ref().unwrap(), &first));
        assert_eq!(s.columns[1].expr.as_column().and_then(|c| c.alias), Some(c1));
    }

    #[test]
    fn different_conditions_keep_both_joins() {
        let oa = TableAlias::new();
        let orders = Arc::new(Expr::Table(TableExpr { alias: oa, entity: "Order".into(), name: "Orders".into() }));
        let (c1, c2) = (TableAlias::new(), TableAlias::new());
        let first = Expr::join(
            JoinKind::LeftOuter,
            orders,
            table(c1),
            Some(Expr::equal(Expr::column(c1, "Id", SqlType::int()), Expr::column(oa, "CustomerId", SqlType::int()))),
        );
        let second = Expr::join(
            JoinKind::LeftOuter,
            first,
            table(c2),
            Some(Expr::equal(Expr::column(c2, "Id", SqlType::int()), Expr::column(oa, "ShipperId", SqlType::int()))),
        );
        assert!(same(&RedundantJoinRemover::remove(&second).unwrap(), &second));
    }
}
