use crate::binder::ColumnProjector;
use crate::dialect::Language;
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::visitor::{walk, AggregateChecker, DeclaredAliasGatherer, ReferencedAliasGatherer, Rewriter};

/// Turns applies into ordinary joins where the right side is only
/// correlated through its WHERE clause. Applies that remain are an error
/// for dialects that cannot write them.
pub struct CrossApplyRewriter<'l> {
    language: &'l dyn Language,
}

impl<'l> CrossApplyRewriter<'l> {
    pub fn rewrite(language: &'l dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        CrossApplyRewriter { language }.visit(expr)
    }

    fn decorrelate(&self, j: &JoinExpr) -> Result<Option<ExprRef>> {
        let Expr::Select(select) = j.right.as_ref() else {
            if let Expr::Table(_) = j.right.as_ref() {
                return Ok(Some(Expr::join(JoinKind::CrossJoin, j.left.clone(), j.right.clone(), None)));
            }
            return Ok(None);
        };
        if select.take.is_some() || select.skip.is_some() || select.has_group_by() || AggregateChecker::has_aggregates(&j.right) {
            return Ok(None);
        }
        let without_where = select.with_where(None);
        let left_aliases = DeclaredAliasGatherer::gather(&j.left);
        if ReferencedAliasGatherer::references_any(&Expr::Select(without_where.clone()), &left_aliases) {
            return Ok(None);
        }
        let Some(where_) = &select.where_ else {
            return Ok(Some(Expr::join(JoinKind::CrossJoin, j.left.clone(), without_where.into_expr(), None)));
        };
        let existing: Vec<TableAlias> = select
            .from
            .as_deref()
            .map(DeclaredAliasGatherer::gather)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let pc = ColumnProjector::project_onto(where_, &select.columns, select.alias, &existing)?;
        let kind = if j.kind == JoinKind::CrossApply { JoinKind::InnerJoin } else { JoinKind::LeftOuter };
        let right = without_where.with_columns(pc.columns).into_expr();
        Ok(Some(Expr::join(kind, j.left.clone(), right, Some(pc.projector))))
    }
}

impl Rewriter for CrossApplyRewriter<'_> {
    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let visited = walk(self, expr)?;
        let Expr::Join(j) = visited.as_ref() else {
            return Ok(visited);
        };
        if !j.kind.is_apply() {
            return Ok(visited);
        }
        if let Some(join) = self.decorrelate(j)? {
            return Ok(join);
        }
        if !self.language.supports_apply() {
            let node = if j.kind == JoinKind::CrossApply { "CROSS APPLY" } else { "OUTER APPLY" };
            return Err(QueryError::unsupported_in(node, self.language.name()));
        }
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    fn table(entity: &str, name: &str) -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: entity.into(), name: name.into() })))
    }

    fn correlated_orders(customer: TableAlias) -> SelectExpr {
        let (oa, orders) = table("Order", "Orders");
        SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Freight", Expr::column(oa, "Freight", SqlType::float()), SqlType::float())],
            Some(orders),
            Some(Expr::equal(Expr::column(oa, "CustomerId", SqlType::int()), Expr::column(customer, "Id", SqlType::int()))),
        )
    }

    #[test]
    fn where_correlated_outer_apply_becomes_left_outer_join() {
        let (ca, customers) = table("Customer", "Customers");
        let right = correlated_orders(ca);
        let ra = right.alias;
        let join = Expr::join(JoinKind::OuterApply, customers, right.into_expr(), None);
        let out = CrossApplyRewriter::rewrite(default_language(DialectKind::Sqlite), &join).unwrap();
        match out.as_ref() {
            Expr::Join(j) => {
                assert_eq!(j.kind, JoinKind::LeftOuter);
                let right = j.right.as_select().unwrap();
                assert!(right.where_.is_none());
                assert!(right.column("CustomerId").is_some());
                let refs = ReferencedAliasGatherer::gather(j.condition.as_ref().unwrap());
                assert!(refs.contains(&ra) && refs.contains(&ca));
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn apply_over_table_becomes_cross_join() {
        let (_, customers) = table("Customer", "Customers");
        let (_, orders) = table("Order", "Orders");
        let join = Expr::join(JoinKind::CrossApply, customers, orders, None);
        let out = CrossApplyRewriter::rewrite(default_language(DialectKind::MySql), &join).unwrap();
        assert!(matches!(out.as_ref(), Expr::Join(j) if j.kind == JoinKind::CrossJoin));
    }

    #[test]
    fn paged_apply_is_rejected_without_apply_support() {
        let (ca, customers) = table("Customer", "Customers");
        let right = correlated_orders(ca).with_take(Some(Expr::constant(1)));
        let join = Expr::join(JoinKind::CrossApply, customers, right.into_expr(), None);

        let kept = CrossApplyRewriter::rewrite(default_language(DialectKind::TSql), &join).unwrap();
        assert!(same(&kept, &join));

        match CrossApplyRewriter::rewrite(default_language(DialectKind::Sqlite), &join) {
            Err(QueryError::Unsupported { node, dialect }) => {
                assert_eq!(node, "CROSS APPLY");
                assert!(dialect.is_some());
            }
            other => panic!("expected unsupported, got {other:?}"),
        }
    }
}
