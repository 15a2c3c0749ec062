use std::collections::HashSet;

use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::visitor::{visit_list, visit_opt, walk, DeclaredAliasGatherer, Rewriter};

/// Checks that every column reads from an alias some enclosing source
/// declares. Runs right before formatting; a tree that fails here would
/// produce SQL naming a table the statement never introduces.
#[derive(Default)]
pub struct ColumnBindingValidator {
    scopes: Vec<HashSet<TableAlias>>,
}

impl ColumnBindingValidator {
    pub fn validate(expr: &ExprRef) -> Result<()> {
        ColumnBindingValidator::default().visit(expr).map(|_| ())
    }

    fn in_scope(&mut self, aliases: HashSet<TableAlias>, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.scopes.push(aliases);
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn is_bound(&self, alias: TableAlias) -> bool {
        self.scopes.iter().any(|scope| scope.contains(&alias))
    }
}

impl Rewriter for ColumnBindingValidator {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        visit_opt(self, &s.from)?;
        let declared = s.from.as_deref().map(DeclaredAliasGatherer::gather).unwrap_or_default();
        self.in_scope(declared, |this| {
            visit_opt(this, &s.where_)?;
            for column in &s.columns {
                this.visit(&column.expr)?;
            }
            for ordering in &s.order_by {
                this.visit(&ordering.expr)?;
            }
            visit_list(this, &s.group_by)?;
            visit_opt(this, &s.skip)?;
            visit_opt(this, &s.take)?;
            Ok(())
        })?;
        Ok(expr.clone())
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Join(j) = expr.as_ref() else {
            return walk(self, expr);
        };
        self.visit(&j.left)?;
        let left = DeclaredAliasGatherer::gather(&j.left);
        if j.kind.is_apply() {
            self.in_scope(left.clone(), |this| this.visit(&j.right).map(|_| ()))?;
        } else {
            self.visit(&j.right)?;
        }
        if let Some(condition) = &j.condition {
            let mut both = left;
            both.extend(DeclaredAliasGatherer::gather(&j.right));
            self.in_scope(both, |this| this.visit(condition).map(|_| ()))?;
        }
        Ok(expr.clone())
    }

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        self.visit(&p.select)?;
        let alias = p.select()?.alias;
        self.in_scope(HashSet::from([alias]), |this| this.visit(&p.projector).map(|_| ()))?;
        Ok(expr.clone())
    }

    fn visit_client_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::ClientJoin(c) = expr.as_ref() else {
            return walk(self, expr);
        };
        visit_list(self, &c.outer_key)?;
        self.visit(&c.projection)?;
        let inner = c.projection.as_projection()?.select()?.alias;
        self.in_scope(HashSet::from([inner]), |this| visit_list(this, &c.inner_key).map(|_| ()))?;
        Ok(expr.clone())
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Column(c) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        match c.alias {
            Some(alias) if self.is_bound(alias) => Ok(expr.clone()),
            Some(alias) => Err(QueryError::UnboundColumn { alias: alias.to_string(), name: c.name.clone() }),
            None => Err(QueryError::UnboundColumn { alias: "<none>".into(), name: c.name.clone() }),
        }
    }

    /// Named values are bound by the client, not by a FROM source.
    fn visit_named_value(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_command(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let table = match expr.as_ref() {
            Expr::Insert(i) => &i.table,
            Expr::Update(u) => &u.table,
            Expr::Delete(d) => &d.table,
            _ => return walk(self, expr),
        };
        let declared = DeclaredAliasGatherer::gather(table);
        self.in_scope(declared, |this| walk(this, expr).map(|_| ()))?;
        Ok(expr.clone())
    }
}
