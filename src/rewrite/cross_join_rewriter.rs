use std::collections::HashSet;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{
    same_columns, same_order_by, visit_columns, visit_list, visit_opt, visit_order_by, walk, DeclaredAliasGatherer,
    ReferencedAliasGatherer, Rewriter,
};

/// Turns a cross join into an inner join when the enclosing WHERE has
/// conjuncts that relate exactly the two sides; those conjuncts move into
/// the join condition.
#[derive(Default)]
pub struct CrossJoinRewriter {
    current_where: Option<ExprRef>,
}

impl CrossJoinRewriter {
    pub fn rewrite(expr: &ExprRef) -> Result<ExprRef> {
        CrossJoinRewriter::default().visit(expr)
    }
}

fn can_be_join_condition(expr: &Expr, left: &HashSet<TableAlias>, right: &HashSet<TableAlias>) -> bool {
    let referenced = ReferencedAliasGatherer::gather(expr);
    referenced.iter().any(|a| left.contains(a))
        && referenced.iter().any(|a| right.contains(a))
        && referenced.iter().all(|a| left.contains(a) || right.contains(a))
}

impl Rewriter for CrossJoinRewriter {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let saved = std::mem::replace(&mut self.current_where, s.where_.clone());
        let from = visit_opt(self, &s.from);
        let remaining = std::mem::replace(&mut self.current_where, saved);
        let from = from?;

        let where_ = visit_opt(self, &remaining)?;
        let columns = visit_columns(self, &s.columns)?;
        let order_by = visit_order_by(self, &s.order_by)?;
        let group_by = visit_list(self, &s.group_by)?;
        let skip = visit_opt(self, &s.skip)?;
        let take = visit_opt(self, &s.take)?;
        if same_opt(&from, &s.from)
            && same_opt(&where_, &s.where_)
            && same_columns(&columns, &s.columns)
            && same_order_by(&order_by, &s.order_by)
            && same_list(&group_by, &s.group_by)
            && same_opt(&skip, &s.skip)
            && same_opt(&take, &s.take)
        {
            return Ok(expr.clone());
        }
        Ok(SelectExpr { alias: s.alias, columns, from, where_, order_by, group_by, distinct: s.distinct, reverse: s.reverse, skip, take }
            .into_expr())
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let visited = walk(self, expr)?;
        let Expr::Join(j) = visited.as_ref() else {
            return Ok(visited);
        };
        let Some(where_) = self.current_where.clone() else {
            return Ok(visited);
        };
        if j.kind != JoinKind::CrossJoin {
            return Ok(visited);
        }
        let left = DeclaredAliasGatherer::gather(&j.left);
        let right = DeclaredAliasGatherer::gather(&j.right);
        let (good, rest): (Vec<_>, Vec<_>) =
            Expr::split_and(&where_).into_iter().partition(|e| can_be_join_condition(e, &left, &right));
        let Some(condition) = Expr::and_all(good) else {
            return Ok(visited);
        };
        self.current_where = Expr::and_all(rest);
        Ok(Expr::join(JoinKind::InnerJoin, j.left.clone(), j.right.clone(), Some(condition)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn table(entity: &str) -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: entity.into(), name: format!("{entity}s") })))
    }

    #[test]
    fn relating_conjuncts_move_into_the_join() {
        let (ca, customers) = table("Customer");
        let (oa, orders) = table("Order");
        let relate = Expr::equal(Expr::column(oa, "CustomerId", SqlType::int()), Expr::column(ca, "Id", SqlType::int()));
        let filter = Expr::binary(BinaryOp::GreaterThan, Expr::column(oa, "Freight", SqlType::float()), Expr::constant(10));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", Expr::column(oa, "Id", SqlType::int()), SqlType::int())],
            Some(Expr::join(JoinKind::CrossJoin, customers, orders, None)),
            Some(Expr::and(relate.clone(), filter.clone())),
        )
        .into_expr();

        let out = CrossJoinRewriter::rewrite(&select).unwrap();
        let s = out.as_select().unwrap();
        assert!(same(s.where_.as_ref().unwrap(), &filter));
        match s.from.as_deref() {
            Some(Expr::Join(j)) => {
                assert_eq!(j.kind, JoinKind::InnerJoin);
                assert!(same(j.condition.as_ref().unwrap(), &relate));
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_filter_leaves_cross_join() {
        let (_, customers) = table("Customer");
        let (oa, orders) = table("Order");
        let filter = Expr::binary(BinaryOp::GreaterThan, Expr::column(oa, "Freight", SqlType::float()), Expr::constant(10));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![],
            Some(Expr::join(JoinKind::CrossJoin, customers, orders, None)),
            Some(filter),
        )
        .into_expr();
        assert!(same(&CrossJoinRewriter::rewrite(&select).unwrap(), &select));
    }
}
