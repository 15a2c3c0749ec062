use tracing::{debug, trace};

use crate::error::Result;
use crate::expr::{same, ExprRef};
use crate::mapping::QueryMapper;
use crate::policy::{QueryPolicy, RelationshipIncluder};
use crate::rewrite::{
    ClientJoinedProjectionRewriter, RedundantColumnRemover, RedundantJoinRemover, RedundantSubqueryRemover,
    SingletonProjectionRewriter, UnusedColumnRemover,
};
use crate::visitor::PlanWriter;

/// Structural stage between the mapper and the dialect: inclusion,
/// singleton joins and client joins, each followed by cleanup when it
/// changed the tree. The order is fixed.
pub struct QueryPolice;

impl QueryPolice {
    pub fn apply(mapper: &QueryMapper<'_>, policy: &QueryPolicy, expr: &ExprRef) -> Result<ExprRef> {
        debug!(dialect = mapper.language().name(), "police");

        let expr = Self::stage("include", expr, |e| RelationshipIncluder::include(mapper, policy, e))?;
        let expr = Self::stage("singleton projections", &expr, SingletonProjectionRewriter::rewrite)?;
        Self::stage("client joins", &expr, |e| ClientJoinedProjectionRewriter::rewrite(policy, e))
    }

    /// Run one structural pass; cleanup only when it produced a new tree.
    fn stage(name: &str, expr: &ExprRef, pass: impl FnOnce(&ExprRef) -> Result<ExprRef>) -> Result<ExprRef> {
        let rewritten = pass(expr)?;
        if same(&rewritten, expr) {
            return Ok(rewritten);
        }
        let cleaned = Self::cleanup(&rewritten)?;
        trace!(stage = name, plan = %PlanWriter::write(&cleaned), "after police stage");
        Ok(cleaned)
    }

    /// Unused columns, redundant columns, redundant subqueries, redundant
    /// joins.
    pub fn cleanup(expr: &ExprRef) -> Result<ExprRef> {
        let expr = UnusedColumnRemover::remove(expr)?;
        let expr = RedundantColumnRemover::remove(&expr)?;
        let expr = RedundantSubqueryRemover::remove(&expr)?;
        RedundantJoinRemover::remove(&expr)
    }
}
