use std::sync::Arc;

use crate::binder::{ColumnProjector, OuterJoinTest};
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::visitor::{walk, AggregateChecker, ColumnMapper, Rewriter};

/// Folds singleton nested projections (`FirstOrDefault` style lookups in a
/// projector) into the enclosing select as an outer apply, so one round
/// trip returns the row and its related value together.
pub struct SingletonProjectionRewriter {
    is_top_level: bool,
    current_select: Option<ExprRef>,
}

impl SingletonProjectionRewriter {
    pub fn rewrite(expr: &ExprRef) -> Result<ExprRef> {
        SingletonProjectionRewriter { is_top_level: true, current_select: None }.visit(expr)
    }

    fn can_join_on_server(select: &ExprRef) -> bool {
        match select.as_ref() {
            Expr::Select(s) => !s.distinct && !s.has_group_by() && !AggregateChecker::has_aggregates(select),
            _ => false,
        }
    }

    fn with_new_top_level(&mut self, f: impl FnOnce(&mut Self) -> Result<ExprRef>) -> Result<ExprRef> {
        let saved_top = std::mem::replace(&mut self.is_top_level, true);
        let saved_select = self.current_select.take();
        let result = f(self);
        self.is_top_level = saved_top;
        self.current_select = saved_select;
        result
    }

    fn join_singleton(&mut self, current: &SelectExpr, projection: &ProjectionExpr) -> Result<ExprRef> {
        let new_alias = TableAlias::new();
        let current = current.add_redundant_select(new_alias);
        let inner_alias = projection.select()?.alias;
        let Some(pushed_down) = current.from.clone() else {
            return Err(QueryError::internal("redundant select without a source"));
        };

        let source = ColumnMapper::map(&projection.select, new_alias, [current.alias])?;
        let tested = OuterJoinTest::add(&ProjectionExpr {
            select: source,
            projector: projection.projector.clone(),
            aggregator: projection.aggregator,
        })?;
        let pc = ColumnProjector::project_onto(&tested.projector, &current.columns, current.alias, &[new_alias, inner_alias])?;
        let join = Expr::join(JoinKind::OuterApply, pushed_down, tested.select, None);
        self.current_select = Some(SelectExpr::new(current.alias, pc.columns, Some(join), None).into_expr());
        self.visit(&pc.projector)
    }
}

impl Rewriter for SingletonProjectionRewriter {
    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        if self.is_top_level {
            self.is_top_level = false;
            self.current_select = Some(p.select.clone());
            let projector = self.visit(&p.projector)?;
            let select = self.current_select.clone().unwrap_or_else(|| p.select.clone());
            if same(&projector, &p.projector) && same(&select, &p.select) {
                return Ok(expr.clone());
            }
            return Ok(Arc::new(Expr::Projection(ProjectionExpr { select, projector, aggregator: p.aggregator })));
        }
        if p.is_singleton() {
            if let Some(current) = self.current_select.clone().filter(Self::can_join_on_server) {
                return self.join_singleton(current.as_select()?, p);
            }
        }
        self.with_new_top_level(|this| walk(this, expr))
    }

    fn visit_client_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.with_new_top_level(|this| walk(this, expr))
    }

    fn visit_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_command(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        self.is_top_level = true;
        walk(self, expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::contains;

    fn orders_with_customer_lookup(aggregator: Option<ElementKind>) -> ExprRef {
        let oa = TableAlias::new();
        let orders = Arc::new(Expr::Table(TableExpr { alias: oa, entity: "Order".into(), name: "Orders".into() }));
        let outer = SelectExpr::new(
            TableAlias::new(),
            vec![
                ColumnDeclaration::new("Id", Expr::column(oa, "Id", SqlType::int()), SqlType::int()),
                ColumnDeclaration::new("CustomerId", Expr::column(oa, "CustomerId", SqlType::int()), SqlType::int()),
            ],
            Some(orders),
            None,
        );

        let ca = TableAlias::new();
        let customers = Arc::new(Expr::Table(TableExpr { alias: ca, entity: "Customer".into(), name: "Customers".into() }));
        let inner = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Name", Expr::column(ca, "Name", SqlType::nvarchar(40)), SqlType::nvarchar(40))],
            Some(customers),
            Some(Expr::equal(Expr::column(ca, "Id", SqlType::int()), Expr::column(outer.alias, "CustomerId", SqlType::int()))),
        );
        let lookup = Expr::projection(inner.clone(), Expr::column(inner.alias, "Name", SqlType::nvarchar(40)), aggregator);
        let projector = Expr::record(vec![
            ("Id".into(), Expr::column(outer.alias, "Id", SqlType::int())),
            ("Customer".into(), lookup),
        ]);
        Expr::projection(outer, projector, None)
    }

    #[test]
    fn singleton_lookup_becomes_outer_apply() {
        let tree = orders_with_customer_lookup(Some(ElementKind::SingleOrDefault));
        let out = SingletonProjectionRewriter::rewrite(&tree).unwrap();
        let p = out.as_projection().unwrap();
        assert!(matches!(p.select().unwrap().from.as_deref(), Some(Expr::Join(j)) if j.kind == JoinKind::OuterApply));
        assert!(!contains(&p.projector, |e| matches!(e, Expr::Projection(_))));
        match p.projector.as_ref() {
            Expr::Record(r) => assert!(matches!(r.field("Customer").map(|e| e.as_ref()), Some(Expr::OuterJoined(_)))),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn collection_projections_stay_nested() {
        let tree = orders_with_customer_lookup(None);
        let out = SingletonProjectionRewriter::rewrite(&tree).unwrap();
        assert!(same(&out, &tree));
    }
}
