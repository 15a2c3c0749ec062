use std::sync::Arc;

use tracing::trace;

use crate::binder::ColumnProjector;
use crate::dialect::Language;
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::visitor::{walk, walk_select, DeclaredAliasGatherer, Rewriter};

const ROW_NUMBER_COLUMN: &str = "_rownum";

/// Pages with `ROW_NUMBER() OVER (ORDER BY ..)` for dialects without an
/// OFFSET clause: the numbered select is wrapped and the wrapper filters on
/// the row number.
pub struct SkipToRowNumberRewriter<'l> {
    language: &'l dyn Language,
}

impl<'l> SkipToRowNumberRewriter<'l> {
    pub fn rewrite(language: &'l dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        SkipToRowNumberRewriter { language }.visit(expr)
    }

    fn page(&self, select: &SelectExpr, skip: &ExprRef) -> Result<ExprRef> {
        let mut numbered = select.with_skip(None).with_take(None);
        let mut order_by = select.order_by.clone();
        if numbered.distinct || numbered.has_group_by() {
            numbered = numbered.add_redundant_select(TableAlias::new());
            order_by = rebind_orderings(&mut numbered, &order_by)?;
        }
        let numbered = numbered.add_column(ColumnDeclaration::new(
            ROW_NUMBER_COLUMN,
            Arc::new(Expr::RowNumber(order_by)),
            SqlType::int(),
        ));

        let paged = numbered.add_redundant_select(TableAlias::new()).remove_column(ROW_NUMBER_COLUMN);
        let Some(inner_alias) = paged.from.as_ref().and_then(|f| f.declared_alias()) else {
            return Err(QueryError::internal("numbered select lost its source"));
        };
        let row_number = Expr::column(inner_alias, ROW_NUMBER_COLUMN, SqlType::int());
        let where_ = match &select.take {
            Some(take) => Arc::new(Expr::Between(BetweenExpr {
                expr: row_number,
                lower: fold_add(skip, &Expr::constant(1)),
                upper: fold_add(skip, take),
            })),
            None => Expr::binary(BinaryOp::GreaterThan, row_number, skip.clone()),
        };
        trace!(dialect = self.language.name(), alias = %select.alias, "paging through row number");
        Ok(paged.with_where(Some(where_)).into_expr())
    }
}

/// Re-express orderings of a select that was just pushed below `outer` in
/// terms of the inner select's columns, declaring what is missing.
fn rebind_orderings(outer: &mut SelectExpr, orderings: &[OrderExpr]) -> Result<Vec<OrderExpr>> {
    let Some(Expr::Select(inner)) = outer.from.as_deref() else {
        return Ok(orderings.to_vec());
    };
    let existing: Vec<TableAlias> = inner.from.as_deref().map(DeclaredAliasGatherer::gather).unwrap_or_default().into_iter().collect();
    let mut columns = inner.columns.clone();
    let mut rebound = Vec::with_capacity(orderings.len());
    for ordering in orderings {
        let pc = ColumnProjector::project_onto(&ordering.expr, &columns, inner.alias, &existing)?;
        columns = pc.columns;
        rebound.push(OrderExpr::new(ordering.order_type, pc.projector));
    }
    let inner = inner.with_columns(columns).with_order_by(Vec::new());
    *outer = outer.with_from(Some(inner.into_expr()));
    Ok(rebound)
}

/// `a + b`, computed up front when both are integer constants and the sum
/// fits in an `i64`.
pub(crate) fn fold_add(a: &ExprRef, b: &ExprRef) -> ExprRef {
    let folded = match (a.as_ref(), b.as_ref()) {
        (Expr::Constant(x), Expr::Constant(y)) => x.as_i64().zip(y.as_i64()).and_then(|(x, y)| x.checked_add(y)),
        _ => None,
    };
    match folded {
        Some(sum) => Expr::constant(sum),
        None => Expr::binary(BinaryOp::Add, a.clone(), b.clone()),
    }
}

impl Rewriter for SkipToRowNumberRewriter<'_> {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk_select(self, expr, s)?;
        let select = visited.as_select()?;
        match &select.skip {
            Some(skip) => self.page(select, skip),
            None => Ok(visited),
        }
    }
}
