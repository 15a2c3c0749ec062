use std::sync::Arc;

use crate::binder::{bind_member, ColumnProjector, OuterJoinTest};
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::mapping::QueryMapper;
use crate::visitor::{visit_columns, visit_list, visit_opt, visit_order_by, walk, DeclaredAliasGatherer, Rewriter};

/// Expands association members left behind by the binder.
///
/// A to-one member referenced while a select is being visited is outer
/// applied onto that select's FROM and replaced by the related projector;
/// anything else becomes a correlated nested projection.
pub struct RelationshipBinder<'m, 'a> {
    mapper: &'m QueryMapper<'a>,
    current_from: Option<ExprRef>,
}

impl<'m, 'a> RelationshipBinder<'m, 'a> {
    pub fn bind(mapper: &'m QueryMapper<'a>, expr: &ExprRef) -> Result<ExprRef> {
        RelationshipBinder { mapper, current_from: None }.visit(expr)
    }
}

impl Rewriter for RelationshipBinder<'_, '_> {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let from = visit_opt(self, &s.from)?;
        let saved = std::mem::replace(&mut self.current_from, from.clone());
        let result = (|| {
            let where_ = visit_opt(self, &s.where_)?;
            let order_by = visit_order_by(self, &s.order_by)?;
            let group_by = visit_list(self, &s.group_by)?;
            let skip = visit_opt(self, &s.skip)?;
            let take = visit_opt(self, &s.take)?;
            let columns = visit_columns(self, &s.columns)?;
            Ok::<_, QueryError>((where_, order_by, group_by, skip, take, columns))
        })();
        let current = std::mem::replace(&mut self.current_from, saved);
        let (where_, order_by, group_by, skip, take, columns) = result?;
        let from = current.or(from);
        if same_opt(&from, &s.from)
            && same_opt(&where_, &s.where_)
            && crate::visitor::same_order_by(&order_by, &s.order_by)
            && same_list(&group_by, &s.group_by)
            && same_opt(&skip, &s.skip)
            && same_opt(&take, &s.take)
            && crate::visitor::same_columns(&columns, &s.columns)
        {
            return Ok(expr.clone());
        }
        Ok(SelectExpr { alias: s.alias, columns, from, where_, order_by, group_by, distinct: s.distinct, reverse: s.reverse, skip, take }
            .into_expr())
    }

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let mut select = self.visit(&p.select)?;
        let saved = std::mem::replace(&mut self.current_from, Some(select.clone()));
        let projector = self.visit(&p.projector);
        let current = std::mem::replace(&mut self.current_from, saved);
        let mut projector = projector?;

        if let Some(from) = current.filter(|f| !same(f, &select)) {
            // the projector pulled in outer applies; project over the join
            let alias = TableAlias::new();
            let existing: Vec<TableAlias> = DeclaredAliasGatherer::gather(&from).into_iter().collect();
            let pc = ColumnProjector::project(&projector, alias, &existing)?;
            select = SelectExpr::new(alias, pc.columns, Some(from), None).into_expr();
            projector = pc.projector;
        }
        if same(&select, &p.select) && same(&projector, &p.projector) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Projection(ProjectionExpr { select, projector, aggregator: p.aggregator })))
    }

    fn visit_member(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Member(m) = expr.as_ref() else {
            return walk(self, expr);
        };
        let source = self.visit(&m.object)?;
        if let Expr::Entity(entity) = source.as_ref() {
            let mapping = self.mapper.mapping();
            if mapping.is_association_relationship(&entity.entity, &m.name) {
                let member = self.mapper.get_member_expression(&source, &entity.entity, &m.name)?;
                let member = self.visit(&member)?;
                let projection = member.as_projection()?;
                if let (Some(from), true) = (&self.current_from, mapping.is_singleton_relationship(&entity.entity, &m.name)) {
                    let tested = OuterJoinTest::add(projection)?;
                    self.current_from = Some(Expr::join(JoinKind::OuterApply, from.clone(), tested.select.clone(), None));
                    return Ok(tested.projector);
                }
                return Ok(member);
            }
        }
        let bound = bind_member(&source, &m.name);
        match bound.as_ref() {
            Expr::Member(b) if b.name == m.name => match b.object.as_ref() {
                Expr::Entity(e) => Err(QueryError::mapping(format!("member '{}.{}' is not mapped", e.entity, m.name))),
                other => Err(QueryError::unsupported(format!("member '{}' of {}", m.name, other.kind_name()))),
            },
            _ => Ok(bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::_tests::fixtures::northwind_mapping;
    use crate::binder::QueryBinder;
    use crate::config::DialectKind;
    use crate::dialect::default_language;
    use crate::query::{QExpr, Query};
    use crate::visitor::contains;

    fn bind(query: &Query) -> Result<ExprRef> {
        let mapping = northwind_mapping();
        let mapper = QueryMapper::new(&mapping, default_language(DialectKind::TSql));
        let bound = QueryBinder::bind(&mapper, query.expr())?;
        RelationshipBinder::bind(&mapper, &bound)
    }

    #[test]
    fn to_one_member_in_where_becomes_outer_apply() {
        let q = Query::from("Order").filter(|o| o.member("Customer").member("City").eq("London"));
        let bound = bind(&q).unwrap();
        assert!(contains(&bound, |e| matches!(e, Expr::Join(j) if j.kind == JoinKind::OuterApply)));
        assert!(!contains(&bound, |e| matches!(e, Expr::Member(_))));
    }

    #[test]
    fn to_one_member_in_projector_is_outer_joined() {
        let q = Query::from("Order").select(|o| QExpr::record([("Id", o.member("Id")), ("Customer", o.member("Customer"))]));
        let bound = bind(&q).unwrap();
        let p = bound.as_projection().unwrap();
        match p.projector.as_ref() {
            Expr::Record(r) => assert!(matches!(r.field("Customer").map(|e| e.as_ref()), Some(Expr::OuterJoined(_)))),
            other => panic!("expected record, got {other:?}"),
        }
        assert!(matches!(p.select().unwrap().from.as_deref(), Some(Expr::Join(j)) if j.kind == JoinKind::OuterApply));
    }

    #[test]
    fn to_many_member_in_projector_is_nested_projection() {
        let q = Query::from("Customer").select(|c| QExpr::record([("Name", c.member("Name")), ("Orders", c.member("Orders"))]));
        let bound = bind(&q).unwrap();
        match bound.as_projection().unwrap().projector.as_ref() {
            Expr::Record(r) => assert!(matches!(r.field("Orders").map(|e| e.as_ref()), Some(Expr::Projection(p)) if p.aggregator.is_none())),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn referencing_unmapped_member_is_a_mapping_error() {
        let q = Query::from("Customer").filter(|c| c.member("Fax").eq("x"));
        match bind(&q) {
            Err(QueryError::Mapping(msg)) => assert!(msg.contains("Customer.Fax")),
            other => panic!("expected mapping error, got {other:?}"),
        }
    }
}
