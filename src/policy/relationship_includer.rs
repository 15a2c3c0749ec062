use std::sync::Arc;

use tracing::trace;

use crate::error::Result;
use crate::expr::*;
use crate::mapping::QueryMapper;
use crate::policy::QueryPolicy;
use crate::visitor::{walk, Rewriter};

/// Adds the associations the policy includes to every entity a projector
/// produces. Inclusion recurses into the related entities, but an
/// association already being expanded on the current path is not expanded
/// again.
pub struct RelationshipIncluder<'m, 'a> {
    mapper: &'m QueryMapper<'a>,
    policy: &'m QueryPolicy,
    scope: Vec<(String, String)>,
}

impl<'m, 'a> RelationshipIncluder<'m, 'a> {
    pub fn include(mapper: &'m QueryMapper<'a>, policy: &'m QueryPolicy, expr: &ExprRef) -> Result<ExprRef> {
        RelationshipIncluder { mapper, policy, scope: Vec::new() }.visit(expr)
    }

    fn in_scope(&self, entity: &str, member: &str) -> bool {
        self.scope.iter().any(|(e, m)| e == entity && m == member)
    }
}

impl Rewriter for RelationshipIncluder<'_, '_> {
    /// Only projectors carry entities worth extending.
    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let projector = self.visit(&p.projector)?;
        if same(&projector, &p.projector) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Projection(ProjectionExpr { select: p.select.clone(), projector, aggregator: p.aggregator })))
    }

    fn visit_entity(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Entity(e) = expr.as_ref() else {
            return walk(self, expr);
        };
        let visited = walk(self, expr)?;
        let Expr::Record(record) = e.expr.as_ref() else {
            return Ok(visited);
        };

        let mapping = self.mapper.mapping();
        let mut fields = match visited.as_ref() {
            Expr::Entity(EntityExpr { expr, .. }) => match expr.as_ref() {
                Expr::Record(r) => r.fields.clone(),
                _ => record.fields.clone(),
            },
            _ => record.fields.clone(),
        };
        let mut added = false;
        for member in mapping.get_mapped_members(&e.entity) {
            if !mapping.is_association_relationship(&e.entity, member)
                || !self.policy.is_included(&e.entity, member)
                || self.in_scope(&e.entity, member)
                || fields.iter().any(|(name, _)| name == member)
            {
                continue;
            }
            trace!(entity = %e.entity, member, "including association");
            let related = self.mapper.get_member_expression(expr, &e.entity, member)?;
            self.scope.push((e.entity.clone(), member.to_string()));
            let related = self.visit(&related);
            self.scope.pop();
            fields.push((member.to_string(), related?));
            added = true;
        }
        if !added {
            return Ok(visited);
        }
        Ok(Arc::new(Expr::Entity(EntityExpr { entity: e.entity.clone(), expr: Expr::record(fields) })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::_tests::fixtures::northwind_mapping;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    fn entity_fields(expr: &ExprRef) -> Vec<(String, ExprRef)> {
        match expr.as_ref() {
            Expr::Entity(EntityExpr { expr, .. }) => match expr.as_ref() {
                Expr::Record(r) => r.fields.clone(),
                other => panic!("expected record, got {other:?}"),
            },
            other => panic!("expected entity, got {other:?}"),
        }
    }

    #[test]
    fn default_policy_changes_nothing() {
        let mapping = northwind_mapping();
        let mapper = QueryMapper::new(&mapping, default_language(DialectKind::TSql));
        let query = mapper.get_query_expression("Customer").unwrap();
        let out = RelationshipIncluder::include(&mapper, &QueryPolicy::new(), &query).unwrap();
        assert!(same(&out, &query));
    }

    #[test]
    fn included_association_is_added_to_the_entity() {
        let mapping = northwind_mapping();
        let mapper = QueryMapper::new(&mapping, default_language(DialectKind::TSql));
        let policy = QueryPolicy::new().include("Customer", "Orders");
        let query = mapper.get_query_expression("Customer").unwrap();
        let out = RelationshipIncluder::include(&mapper, &policy, &query).unwrap();
        let fields = entity_fields(&out.as_projection().unwrap().projector);
        let orders = fields.iter().find(|(n, _)| n == "Orders").map(|(_, e)| e.clone());
        assert!(matches!(orders.as_deref(), Some(Expr::Projection(p)) if p.aggregator.is_none()));
    }

    #[test]
    fn cyclic_inclusion_stops_on_the_path() {
        let mapping = northwind_mapping();
        let mapper = QueryMapper::new(&mapping, default_language(DialectKind::TSql));
        let policy = QueryPolicy::new().include("Customer", "Orders").include("Order", "Customer");
        let query = mapper.get_query_expression("Customer").unwrap();
        let out = RelationshipIncluder::include(&mapper, &policy, &query).unwrap();

        let fields = entity_fields(&out.as_projection().unwrap().projector);
        let orders = fields.iter().find(|(n, _)| n == "Orders").map(|(_, e)| e.clone()).unwrap();
        let order_fields = entity_fields(&orders.as_projection().unwrap().projector);
        let customer = order_fields.iter().find(|(n, _)| n == "Customer").map(|(_, e)| e.clone()).unwrap();
        let customer_fields = entity_fields(&customer.as_projection().unwrap().projector);
        assert!(customer_fields.iter().all(|(n, _)| n != "Orders"));
    }
}
