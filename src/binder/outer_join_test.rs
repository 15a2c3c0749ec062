use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::expr::*;
use crate::visitor::{DeclaredAliasGatherer, ExprComparer};

/// Marks a projection that is about to be outer joined, so an absent
/// related row materializes as "no entity" instead of an entity of nulls.
pub struct OuterJoinTest;

impl OuterJoinTest {
    /// Wrap the projector in `OuterJoined` with a test column that is null
    /// exactly when no row matched.
    pub fn add(projection: &ProjectionExpr) -> Result<ProjectionExpr> {
        let select = projection.select()?;
        let test = Self::test_expression(select);
        let existing = select
            .columns
            .iter()
            .find(|c| ExprComparer::are_equal(&c.expr, &test))
            .map(|c| (c.name.clone(), c.sql_type.clone()));
        let (select, name, sql_type) = match existing {
            Some((name, sql_type)) => (select.clone(), name, sql_type),
            None => {
                let base = match test.as_column() {
                    Some(c) => c.name.clone(),
                    None => "Test".to_string(),
                };
                let name = available_column_name(&select.columns, &base);
                let sql_type = TypeInference::sql_type_of(&test).nullable();
                (select.add_column(ColumnDeclaration::new(name.clone(), test, sql_type.clone())), name, sql_type)
            }
        };
        let test_column = Expr::column(select.alias, name, sql_type);
        let projector = Arc::new(Expr::OuterJoined(OuterJoinedExpr { test: test_column, expr: projection.projector.clone() }));
        Ok(ProjectionExpr { select: select.into_expr(), projector, aggregator: projection.aggregator })
    }

    /// A column of the select's own sources that takes part in its join
    /// predicate, preferring one already projected; a constant otherwise.
    fn test_expression(select: &SelectExpr) -> ExprRef {
        let aliases = select.from.as_deref().map(DeclaredAliasGatherer::gather).unwrap_or_default();
        let join_columns = select.where_.as_ref().map(|w| Self::join_columns(w, &aliases)).unwrap_or_default();
        if let Some(projected) = join_columns
            .iter()
            .find(|jc| select.columns.iter().any(|c| ExprComparer::are_equal(&c.expr, jc)))
        {
            return projected.clone();
        }
        join_columns.into_iter().next().unwrap_or_else(|| Expr::constant(1))
    }

    fn join_columns(where_: &ExprRef, aliases: &HashSet<TableAlias>) -> Vec<ExprRef> {
        let mut out = Vec::new();
        for predicate in Expr::split_and(where_) {
            if let Expr::Binary(b) = predicate.as_ref() {
                if b.op != BinaryOp::Equal {
                    continue;
                }
                let local = |e: &ExprRef| e.as_column().and_then(|c| c.alias).is_some_and(|a| aliases.contains(&a));
                match (local(&b.left), local(&b.right)) {
                    (true, false) => out.push(b.left.clone()),
                    (false, true) => out.push(b.right.clone()),
                    _ => {}
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlated(outer: TableAlias) -> (ProjectionExpr, TableAlias) {
        let table_alias = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: table_alias, entity: "Customer".into(), name: "Customers".into() }));
        let alias = TableAlias::new();
        let select = SelectExpr::new(
            alias,
            vec![ColumnDeclaration::new("Name", Expr::column(table_alias, "Name", SqlType::nvarchar(40)), SqlType::nvarchar(40))],
            Some(table),
            Some(Expr::equal(Expr::column(table_alias, "Id", SqlType::int()), Expr::column(outer, "CustomerId", SqlType::int()))),
        );
        let projection = ProjectionExpr {
            select: select.into_expr(),
            projector: Expr::column(alias, "Name", SqlType::nvarchar(40)),
            aggregator: Some(ElementKind::SingleOrDefault),
        };
        (projection, alias)
    }

    #[test]
    fn join_key_column_becomes_the_test() {
        let (projection, alias) = correlated(TableAlias::new());
        let tested = OuterJoinTest::add(&projection).unwrap();
        let select = tested.select().unwrap();
        assert_eq!(select.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["Name", "Id"]);
        match tested.projector.as_ref() {
            Expr::OuterJoined(o) => {
                let c = o.test.as_column().unwrap();
                assert_eq!((c.alias, c.name.as_str()), (Some(alias), "Id"));
            }
            other => panic!("expected outer joined, got {other:?}"),
        }
    }

    #[test]
    fn uncorrelated_select_falls_back_to_constant() {
        let alias = TableAlias::new();
        let select = SelectExpr::new(alias, vec![], None, None);
        let projection = ProjectionExpr { select: select.into_expr(), projector: Expr::constant(1), aggregator: None };
        let tested = OuterJoinTest::add(&projection).unwrap();
        let select = tested.select().unwrap();
        assert_eq!(select.columns[0].name, "Test");
        assert!(matches!(select.columns[0].expr.as_ref(), Expr::Constant(_)));
    }
}
