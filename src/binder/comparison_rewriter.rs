use std::sync::Arc;

use crate::binder::bind_member;
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::mapping::QueryMapping;
use crate::visitor::{walk, Rewriter};

/// Turns equality between structured values into column comparisons:
/// entities compare on their primary key, records field by field, and an
/// outer joined value compared with null tests whether the join matched.
pub struct ComparisonRewriter<'a> {
    mapping: &'a dyn QueryMapping,
}

impl<'a> ComparisonRewriter<'a> {
    pub fn rewrite(mapping: &'a dyn QueryMapping, expr: &ExprRef) -> Result<ExprRef> {
        ComparisonRewriter { mapping }.visit(expr)
    }

    fn compare(&self, op: BinaryOp, left: &ExprRef, right: &ExprRef) -> Result<Option<ExprRef>> {
        let negate = op == BinaryOp::NotEqual;
        let finish = |e: ExprRef| if negate { Expr::not(e) } else { e };

        match (left.as_ref(), right.as_ref()) {
            (Expr::OuterJoined(o), r) if is_null_constant(r) => return Ok(Some(finish(Expr::is_null(o.test.clone())))),
            (l, Expr::OuterJoined(o)) if is_null_constant(l) => return Ok(Some(finish(Expr::is_null(o.test.clone())))),
            _ => {}
        }

        let left = skip_outer_joined(left);
        let right = skip_outer_joined(right);
        if let Some(entity) = entity_of(&left).or_else(|| entity_of(&right)) {
            let keys = self.mapping.get_primary_key_members(entity);
            if keys.is_empty() {
                return Err(QueryError::mapping(format!("entity '{entity}' has no primary key to compare on")));
            }
            let predicates = keys
                .iter()
                .map(|k| Expr::binary(BinaryOp::Equal, bind_member(&left, k), bind_member(&right, k)))
                .collect::<Vec<_>>();
            return Ok(Expr::and_all(predicates).map(finish));
        }
        if let (Expr::Record(l), Expr::Record(r)) = (left.as_ref(), right.as_ref()) {
            if l.fields.len() != r.fields.len() || l.fields.iter().any(|(n, _)| r.field(n).is_none()) {
                return Err(QueryError::unsupported("comparison of records with different members"));
            }
            let predicates = l
                .fields
                .iter()
                .filter_map(|(n, le)| r.field(n).map(|re| Expr::equal(le.clone(), re.clone())))
                .collect::<Vec<_>>();
            return Ok(Expr::and_all(predicates).map(finish));
        }
        Ok(None)
    }
}

fn is_null_constant(expr: &Expr) -> bool {
    matches!(expr, Expr::Constant(Literal::Null))
}

fn skip_outer_joined(expr: &ExprRef) -> ExprRef {
    match expr.as_ref() {
        Expr::OuterJoined(o) => o.expr.clone(),
        _ => expr.clone(),
    }
}

fn entity_of(expr: &ExprRef) -> Option<&str> {
    match expr.as_ref() {
        Expr::Entity(e) => Some(e.entity.as_str()),
        _ => None,
    }
}

impl Rewriter for ComparisonRewriter<'_> {
    fn visit_binary(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Binary(b) = expr.as_ref() else {
            return walk(self, expr);
        };
        if matches!(b.op, BinaryOp::Equal | BinaryOp::NotEqual) {
            let left = self.visit(&b.left)?;
            let right = self.visit(&b.right)?;
            if let Some(rewritten) = self.compare(b.op, &left, &right)? {
                return Ok(rewritten);
            }
            if same(&left, &b.left) && same(&right, &b.right) {
                return Ok(expr.clone());
            }
            return Ok(Arc::new(Expr::Binary(BinaryExpr { op: b.op, left, right })));
        }
        walk(self, expr)
    }
}
