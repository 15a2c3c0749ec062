use tracing::{debug, trace};

use crate::dialect::{Language, Pass, SqlFormatter};
use crate::error::Result;
use crate::expr::{same, ExprRef};
use crate::rewrite::{
    ColumnBindingValidator, CrossApplyRewriter, CrossJoinIsolator, CrossJoinRewriter, OrderByRewriter,
    Parameterizer, RedundantColumnRemover, RedundantJoinRemover, RedundantSubqueryRemover,
    SkipToNestedOrderByRewriter, SkipToRowNumberRewriter, UnusedColumnRemover,
};
use crate::visitor::PlanWriter;

/// Dialect stage of the pipeline: the language's rewrite sequence, then
/// parameterization and SQL text.
pub struct Linguist;

impl Linguist {
    pub fn translate(language: &dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        debug!(dialect = language.name(), "linguist");
        let mut expr = expr.clone();
        for pass in language.passes() {
            expr = match pass {
                Pass::OrderBy => OrderByRewriter::rewrite(language, &expr)?,
                Pass::Base => Self::base(language, &expr)?,
                Pass::SkipToRowNumber => SkipToRowNumberRewriter::rewrite(language, &expr)?,
                Pass::SkipToNestedOrderBy => SkipToNestedOrderByRewriter::rewrite(language, &expr)?,
                Pass::CrossJoinIsolate => CrossJoinIsolator::isolate(&expr)?,
                Pass::UnusedColumns => UnusedColumnRemover::remove(&expr)?,
                Pass::RedundantSubqueries => RedundantSubqueryRemover::remove(&expr)?,
            };
            trace!(pass = ?pass, plan = %PlanWriter::write(&expr), "after linguist pass");
        }
        Ok(expr)
    }

    /// Cleanup, then decorrelate applies and cross joins; cleanup again if
    /// that changed anything.
    fn base(language: &dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        let expr = UnusedColumnRemover::remove(expr)?;
        let expr = RedundantColumnRemover::remove(&expr)?;
        let expr = RedundantSubqueryRemover::remove(&expr)?;

        let rewritten = CrossApplyRewriter::rewrite(language, &expr)?;
        let rewritten = CrossJoinRewriter::rewrite(&rewritten)?;
        if same(&rewritten, &expr) {
            return Ok(expr);
        }
        let expr = UnusedColumnRemover::remove(&rewritten)?;
        let expr = RedundantSubqueryRemover::remove(&expr)?;
        let expr = RedundantJoinRemover::remove(&expr)?;
        RedundantColumnRemover::remove(&expr)
    }

    /// Replace client constants with named values.
    pub fn parameterize(language: &dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        Parameterizer::parameterize(language, expr)
    }

    /// SQL text for a fully translated tree. Unbound columns are rejected
    /// before anything is written.
    pub fn format(language: &dyn Language, expr: &ExprRef) -> Result<String> {
        ColumnBindingValidator::validate(expr)?;
        SqlFormatter::format(expr, language)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;
    use crate::error::QueryError;
    use crate::expr::{ColumnDeclaration, Expr, SelectExpr, SqlType, TableAlias, TableExpr};

    fn customers() -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: "Customer".into(), name: "Customers".into() })))
    }

    #[test]
    fn translating_a_clean_tree_keeps_it() {
        let (ta, t) = customers();
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", Expr::column(ta, "Id", SqlType::int()), SqlType::int())],
            Some(t),
            None,
        )
        .into_expr();
        for kind in DialectKind::all() {
            let out = Linguist::translate(default_language(kind), &select).unwrap();
            assert!(same(&out, &select), "{kind:?}");
        }
    }

    #[test]
    fn format_validates_column_binding() {
        let (_, t) = customers();
        let stray = Expr::column(TableAlias::new(), "Id", SqlType::int());
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", stray, SqlType::int())],
            Some(t),
            None,
        )
        .into_expr();
        let err = Linguist::format(default_language(DialectKind::Sqlite), &select).unwrap_err();
        assert!(matches!(err, QueryError::UnboundColumn { .. }));
    }
}
