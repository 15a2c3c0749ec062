use crate::dialect::Language;
use crate::error::Result;
use crate::expr::*;
use crate::rewrite::skip_to_row_number_rewriter::fold_add;
use crate::rewrite::OrderByRewriter;
use crate::visitor::{walk, walk_select, Rewriter};

/// Pages with nested TOP queries for dialects that have neither OFFSET nor
/// ROW_NUMBER:
///
/// ```text
/// SELECT .. ORDER BY x SKIP s TAKE t
///   => SELECT .. FROM (SELECT TOP t .. FROM (SELECT TOP s+t .. ORDER BY x) ORDER BY x DESC) ORDER BY x
/// ```
///
/// Selects that skip without taking, or skip without an ordering, are left
/// for the formatter to reject.
pub struct SkipToNestedOrderByRewriter<'l> {
    language: &'l dyn Language,
}

impl<'l> SkipToNestedOrderByRewriter<'l> {
    pub fn rewrite(language: &'l dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        SkipToNestedOrderByRewriter { language }.visit(expr)
    }

    fn nest(&self, select: &SelectExpr, skip: &ExprRef, take: &ExprRef) -> Result<ExprRef> {
        let first = select.with_take(Some(fold_add(skip, take))).with_skip(None);
        let page = first.add_redundant_select(TableAlias::new()).with_take(Some(take.clone()));

        let page = OrderByRewriter::rewrite(self.language, &page.into_expr())?;
        let page = page.as_select()?;
        let page = page.with_order_by(invert(&page.order_by));

        let outer = page.add_redundant_select(TableAlias::new()).with_take(Some(Expr::constant(0)));
        let outer = OrderByRewriter::rewrite(self.language, &outer.into_expr())?;
        let outer = outer.as_select()?;
        Ok(outer.with_order_by(invert(&outer.order_by)).with_take(None).into_expr())
    }
}

fn invert(order_by: &[OrderExpr]) -> Vec<OrderExpr> {
    order_by.iter().map(|o| OrderExpr::new(o.order_type.reversed(), o.expr.clone())).collect()
}

impl Rewriter for SkipToNestedOrderByRewriter<'_> {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk_select(self, expr, s)?;
        let select = visited.as_select()?;
        match (&select.skip, &select.take) {
            (Some(skip), Some(take)) if select.has_order_by() => self.nest(select, skip, take),
            _ => Ok(visited),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    #[test]
    fn skip_take_nests_three_levels() {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Customer".into(), name: "Customers".into() }));
        let name = Expr::column(ta, "Name", SqlType::nvarchar(40));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Name", name.clone(), SqlType::nvarchar(40))],
            Some(table),
            None,
        )
        .with_order_by(vec![OrderExpr::new(OrderType::Ascending, name)])
        .with_skip(Some(Expr::constant(20)))
        .with_take(Some(Expr::constant(10)));

        let out = SkipToNestedOrderByRewriter::rewrite(default_language(DialectKind::Access), &select.into_expr()).unwrap();
        let outer = out.as_select().unwrap();
        assert!(outer.take.is_none() && outer.skip.is_none());
        assert_eq!(outer.order_by[0].order_type, OrderType::Ascending);

        let page = outer.from.as_ref().unwrap().as_select().unwrap();
        assert!(matches!(page.take.as_deref(), Some(Expr::Constant(t)) if t.as_i64() == Some(10)));
        assert_eq!(page.order_by[0].order_type, OrderType::Descending);

        let first = page.from.as_ref().unwrap().as_select().unwrap();
        assert!(matches!(first.take.as_deref(), Some(Expr::Constant(t)) if t.as_i64() == Some(30)));
        assert!(first.skip.is_none());
        assert_eq!(first.order_by[0].order_type, OrderType::Ascending);
    }

    #[test]
    fn skip_without_ordering_is_left_alone() {
        let select = SelectExpr::new(TableAlias::new(), vec![], None, None).with_skip(Some(Expr::constant(1))).with_take(Some(Expr::constant(1)));
        let tree = select.into_expr();
        let out = SkipToNestedOrderByRewriter::rewrite(default_language(DialectKind::Access), &tree).unwrap();
        assert!(same(&out, &tree));
    }
}
