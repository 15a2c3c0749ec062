use std::sync::Arc;

use crate::expr::{ConditionalExpr, Expr, ExprRef, OuterJoinedExpr, ProjectionExpr};

/// Resolve `source.name` against an already bound expression.
///
/// Anything that cannot be resolved structurally comes back as a plain
/// `Member(source, name)`; association members of entities are left this way
/// on purpose, for the relationship binder to expand.
pub fn bind_member(source: &ExprRef, name: &str) -> ExprRef {
    match source.as_ref() {
        Expr::Record(r) => match r.field(name) {
            Some(field) => field.clone(),
            None => Expr::member(source.clone(), name),
        },
        Expr::Entity(e) => {
            let bound = bind_member(&e.expr, name);
            if is_unresolved(&bound, name) { Expr::member(source.clone(), name) } else { bound }
        }
        Expr::Grouping(g) if name == "Key" => g.key.clone(),
        Expr::OuterJoined(o) => {
            let bound = bind_member(&o.expr, name);
            if matches!(bound.as_ref(), Expr::Column(_)) || is_unresolved(&bound, name) {
                bound
            } else {
                Arc::new(Expr::OuterJoined(OuterJoinedExpr { test: o.test.clone(), expr: bound }))
            }
        }
        Expr::Conditional(c) => Arc::new(Expr::Conditional(ConditionalExpr {
            test: c.test.clone(),
            if_true: bind_member(&c.if_true, name),
            if_false: bind_member(&c.if_false, name),
        })),
        Expr::Projection(p) => Arc::new(Expr::Projection(ProjectionExpr {
            select: p.select.clone(),
            projector: bind_member(&p.projector, name),
            aggregator: p.aggregator,
        })),
        _ => Expr::member(source.clone(), name),
    }
}

fn is_unresolved(bound: &ExprRef, name: &str) -> bool {
    matches!(bound.as_ref(), Expr::Member(m) if m.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{EntityExpr, SqlType, TableAlias};

    fn customer(alias: TableAlias) -> ExprRef {
        Arc::new(Expr::Entity(EntityExpr {
            entity: "Customer".into(),
            expr: Expr::record(vec![
                ("Id".into(), Expr::column(alias, "Id", SqlType::int())),
                ("Name".into(), Expr::column(alias, "Name", SqlType::nvarchar(40))),
            ]),
        }))
    }

    #[test]
    fn entity_fields_resolve_to_columns() {
        let alias = TableAlias::new();
        let bound = bind_member(&customer(alias), "Name");
        assert_eq!(bound.as_column().map(|c| c.name.as_str()), Some("Name"));
    }

    #[test]
    fn unknown_members_stay_on_the_entity() {
        let entity = customer(TableAlias::new());
        let bound = bind_member(&entity, "Orders");
        match bound.as_ref() {
            Expr::Member(m) => {
                assert_eq!(m.name, "Orders");
                assert!(Arc::ptr_eq(&m.object, &entity));
            }
            other => panic!("expected member, got {other:?}"),
        }
    }

    #[test]
    fn outer_joined_columns_drop_the_test() {
        let alias = TableAlias::new();
        let oj = Arc::new(Expr::OuterJoined(OuterJoinedExpr { test: Expr::column(alias, "Test", SqlType::int()), expr: customer(alias) }));
        assert!(matches!(bind_member(&oj, "Id").as_ref(), Expr::Column(_)));
    }
}
