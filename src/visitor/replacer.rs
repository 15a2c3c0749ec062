use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::{ColumnExpr, Expr, ExprRef, TableAlias};
use crate::visitor::{Rewriter, walk};

/// Swap every occurrence of one node (by pointer identity) for another.
pub struct Replacer<'a> {
    search: &'a ExprRef,
    replacement: &'a ExprRef,
}

impl<'a> Replacer<'a> {
    pub fn replace(expr: &ExprRef, search: &'a ExprRef, replacement: &'a ExprRef) -> Result<ExprRef> {
        Replacer { search, replacement }.visit(expr)
    }
}

impl Rewriter for Replacer<'_> {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if Arc::ptr_eq(expr, self.search) {
            return Ok(self.replacement.clone());
        }
        walk(self, expr)
    }
}

/// Re-point columns that read from any of `old_aliases` at `new_alias`,
/// keeping their names.
pub struct ColumnMapper {
    old_aliases: HashSet<TableAlias>,
    new_alias: TableAlias,
}

impl ColumnMapper {
    pub fn map(expr: &ExprRef, new_alias: TableAlias, old_aliases: impl IntoIterator<Item = TableAlias>) -> Result<ExprRef> {
        ColumnMapper { old_aliases: old_aliases.into_iter().collect(), new_alias }.visit(expr)
    }
}

impl Rewriter for ColumnMapper {
    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Column(c) if c.alias.is_some_and(|a| self.old_aliases.contains(&a)) => {
                Ok(Arc::new(Expr::Column(ColumnExpr { alias: Some(self.new_alias), ..c.clone() })))
            }
            _ => Ok(expr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{same, SqlType};

    #[test]
    fn replacer_swaps_by_identity_only() {
        let alias = TableAlias::new();
        let a1 = Expr::column(alias, "A", SqlType::int());
        let a2 = Expr::column(alias, "A", SqlType::int());
        let tree = Expr::and(Expr::is_null(a1.clone()), Expr::is_null(a2.clone()));
        let one = Expr::constant(1);
        let out = Replacer::replace(&tree, &a1, &one).unwrap();
        let Expr::Binary(original) = tree.as_ref() else { unreachable!() };
        match out.as_ref() {
            Expr::Binary(b) => {
                assert!(matches!(b.left.as_ref(), Expr::IsNull(e) if same(e, &one)));
                assert!(same(&b.right, &original.right));
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn column_mapper_moves_only_listed_aliases() {
        let (old, other, new) = (TableAlias::new(), TableAlias::new(), TableAlias::new());
        let tree = Expr::equal(Expr::column(old, "A", SqlType::int()), Expr::column(other, "B", SqlType::int()));
        let out = ColumnMapper::map(&tree, new, [old]).unwrap();
        match out.as_ref() {
            Expr::Binary(b) => {
                assert_eq!(b.left.as_column().and_then(|c| c.alias), Some(new));
                assert_eq!(b.right.as_column().and_then(|c| c.alias), Some(other));
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }
}
