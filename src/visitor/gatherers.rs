use std::collections::HashSet;

use indexmap::IndexSet;

use crate::expr::{ColumnExpr, Expr, ExprRef, NamedValueExpr, TableAlias};

/// Aliases a FROM source declares at its own level. Selects and tables are
/// leaves; joins contribute both sides.
pub struct DeclaredAliasGatherer;

impl DeclaredAliasGatherer {
    pub fn gather(source: &Expr) -> HashSet<TableAlias> {
        let mut out = HashSet::new();
        Self::collect(source, &mut out);
        out
    }

    fn collect(source: &Expr, out: &mut HashSet<TableAlias>) {
        match source {
            Expr::Select(s) => {
                out.insert(s.alias);
            }
            Expr::Table(t) => {
                out.insert(t.alias);
            }
            Expr::Join(j) => {
                Self::collect(&j.left, out);
                Self::collect(&j.right, out);
            }
            _ => {}
        }
    }
}

/// Every alias some column anywhere below `expr` reads from.
pub struct ReferencedAliasGatherer;

impl ReferencedAliasGatherer {
    pub fn gather(expr: &Expr) -> HashSet<TableAlias> {
        let mut out = HashSet::new();
        walk(expr, &mut |e| {
            if let Expr::Column(c) = e {
                if let Some(alias) = c.alias {
                    out.insert(alias);
                }
            }
            true
        });
        out
    }

    pub fn references_any(expr: &Expr, aliases: &HashSet<TableAlias>) -> bool {
        let mut found = false;
        walk(expr, &mut |e| {
            if let Expr::Column(ColumnExpr { alias: Some(a), .. }) = e {
                found |= aliases.contains(a);
            }
            !found
        });
        found
    }
}

/// Distinct columns in first-seen order.
pub struct ReferencedColumnGatherer;

impl ReferencedColumnGatherer {
    pub fn gather(expr: &Expr) -> IndexSet<ColumnExpr> {
        let mut out = IndexSet::new();
        walk(expr, &mut |e| {
            if let Expr::Column(c) = e {
                out.insert(c.clone());
            }
            true
        });
        out
    }
}

/// Named values by name, first occurrence wins.
pub struct NamedValueGatherer;

impl NamedValueGatherer {
    pub fn gather(expr: &Expr) -> Vec<NamedValueExpr> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        walk(expr, &mut |e| {
            if let Expr::NamedValue(nv) = e {
                if seen.insert(nv.name.clone()) {
                    out.push(nv.clone());
                }
            }
            true
        });
        out
    }
}

/// Does a select compute aggregates at its own level? Subqueries and the
/// FROM clause are not inspected.
pub struct AggregateChecker;

impl AggregateChecker {
    pub fn has_aggregates(expr: &Expr) -> bool {
        let Expr::Select(s) = expr else {
            return false;
        };
        let mut found = false;
        let mut check = |e: &Expr| -> bool {
            match e {
                Expr::Aggregate(_) => {
                    found = true;
                    false
                }
                Expr::Select(_) | Expr::Scalar(_) | Expr::Exists(_) | Expr::In(_) | Expr::AggregateSubquery(_) => false,
                _ => !found,
            }
        };
        for part in s
            .where_
            .iter()
            .chain(s.order_by.iter().map(|o| &o.expr))
            .chain(s.columns.iter().map(|c| &c.expr))
        {
            walk(part, &mut check);
        }
        found
    }
}

/// Does the tree contain a node matching `pred`?
pub fn contains(expr: &Expr, pred: impl Fn(&Expr) -> bool) -> bool {
    let mut found = false;
    walk(expr, &mut |e| {
        found |= pred(e);
        !found
    });
    found
}

/// All projections reachable from `expr`, outermost first.
pub fn find_projections(expr: &ExprRef) -> Vec<ExprRef> {
    let mut out = Vec::new();
    collect_projections(expr, &mut out);
    out
}

fn collect_projections(expr: &ExprRef, out: &mut Vec<ExprRef>) {
    if let Expr::Projection(_) = expr.as_ref() {
        out.push(expr.clone());
    }
    for child in expr.children() {
        collect_projections(child, out);
    }
}

/// Pre-order walk; returning `false` from `f` prunes the node's children.
fn walk(expr: &Expr, f: &mut impl FnMut(&Expr) -> bool) {
    if !f(expr) {
        return;
    }
    for child in expr.children() {
        walk(child, f);
    }
}
