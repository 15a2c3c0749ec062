use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::dialect::Language;
use crate::error::Result;
use crate::expr::*;
use crate::visitor::{
    same_columns, same_order_by, visit_opt, walk, walk_select, AggregateChecker, DeclaredAliasGatherer, Rewriter,
};

/// Moves orderings out of nested selects up to the outermost select that
/// may carry them. A select keeps its own ORDER BY only when it is the
/// outermost one or paged (TOP/skip); orderings of inner selects are
/// rebound through each level's columns on the way up.
pub struct OrderByRewriter<'l> {
    language: &'l dyn Language,
    gathered: Option<Vec<OrderExpr>>,
    is_outermost: bool,
}

impl<'l> OrderByRewriter<'l> {
    pub fn rewrite(language: &'l dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        OrderByRewriter { language, gathered: None, is_outermost: true }.visit(expr)
    }

    /// Put `orderings` in front of what has been gathered so far, dropping
    /// later repeats of the same column.
    fn prepend(&mut self, orderings: Vec<OrderExpr>) {
        let mut all = orderings;
        all.extend(self.gathered.take().unwrap_or_default());
        let mut seen = HashSet::new();
        all.retain(|o| match o.expr.as_column() {
            Some(c) => seen.insert((c.alias, c.name.clone())),
            None => true,
        });
        self.gathered = Some(all);
    }

    fn reverse(&mut self) {
        if let Some(gathered) = &mut self.gathered {
            for o in gathered.iter_mut() {
                o.order_type = o.order_type.reversed();
            }
        }
    }

    /// Express `orderings` in terms of the columns of the select `alias`,
    /// declaring new columns for anything not already projected. Orderings
    /// that refer to sources outside `existing` are dropped.
    fn rebind(
        &self,
        orderings: &[OrderExpr],
        alias: TableAlias,
        existing: &HashSet<TableAlias>,
        columns: &[ColumnDeclaration],
    ) -> (Vec<ColumnDeclaration>, Vec<OrderExpr>) {
        let mut columns = columns.to_vec();
        let mut rebound = Vec::with_capacity(orderings.len());
        for ordering in orderings {
            let column = ordering.expr.as_column();
            if column.is_some_and(|c| !c.alias.is_some_and(|a| existing.contains(&a))) {
                continue;
            }
            let declared = columns.iter().position(|d| {
                same(&d.expr, &ordering.expr) || matches!((column, d.expr.as_column()), (Some(c), Some(dc)) if c == dc)
            });
            let expr = match declared {
                Some(i) => Expr::column(alias, columns[i].name.clone(), columns[i].sql_type.clone()),
                None => {
                    let base = match column {
                        Some(c) => c.name.clone(),
                        None => format!("c{}", columns.len()),
                    };
                    let name = available_column_name(&columns, &base);
                    let sql_type = TypeInference::sql_type_of(&ordering.expr);
                    columns.push(ColumnDeclaration::new(name.clone(), ordering.expr.clone(), sql_type.clone()));
                    Expr::column(alias, name, sql_type)
                }
            };
            rebound.push(OrderExpr::new(ordering.order_type, expr));
        }
        (columns, rebound)
    }
}

impl Rewriter for OrderByRewriter<'_> {
    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Select(s) = expr.as_ref() else {
            return walk(self, expr);
        };
        let was_outermost = std::mem::replace(&mut self.is_outermost, false);
        let visited = walk_select(self, expr, s);
        self.is_outermost = was_outermost;
        let visited = visited?;
        let select = visited.as_select()?;

        let has_group_by = select.has_group_by();
        let can_have_order_by = was_outermost || select.take.is_some() || select.skip.is_some();
        let can_receive = can_have_order_by && !has_group_by && !select.distinct && !AggregateChecker::has_aggregates(&visited);

        if select.has_order_by() {
            self.prepend(select.order_by.clone());
        }
        if select.reverse {
            self.reverse();
        }

        let order_by = if can_receive {
            self.gathered.clone().unwrap_or_default()
        } else if can_have_order_by {
            select.order_by.clone()
        } else {
            Vec::new()
        };

        let can_pass_on = !was_outermost && !has_group_by && !select.distinct;
        let mut columns = select.columns.clone();
        if let Some(gathered) = self.gathered.take() {
            if can_pass_on {
                let produced = select.from.as_deref().map(DeclaredAliasGatherer::gather).unwrap_or_default();
                let (rebound_columns, rebound) = self.rebind(&gathered, select.alias, &produced, &select.columns);
                self.prepend(rebound);
                columns = rebound_columns;
            } else {
                trace!(dialect = self.language.name(), alias = %select.alias, "orderings stop at select");
            }
        }

        if same_order_by(&order_by, &select.order_by) && same_columns(&columns, &select.columns) && !select.reverse {
            return Ok(visited);
        }
        Ok(SelectExpr { columns, order_by, reverse: false, ..select.clone() }.into_expr())
    }

    fn visit_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let saved = self.gathered.take();
        let result = walk(self, expr);
        self.gathered = saved;
        result
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Join(j) = expr.as_ref() else {
            return walk(self, expr);
        };
        let left = self.visit(&j.left)?;
        let left_orderings = self.gathered.take();
        let right = self.visit(&j.right)?;
        if let Some(orderings) = left_orderings {
            self.prepend(orderings);
        }
        let condition = visit_opt(self, &j.condition)?;
        if same(&left, &j.left) && same(&right, &j.right) && same_opt(&condition, &j.condition) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Join(JoinExpr { kind: j.kind, left, right, condition })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    fn customers() -> (TableAlias, SelectExpr) {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Customer".into(), name: "Customers".into() }));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", Expr::column(ta, "Id", SqlType::int()), SqlType::int())],
            Some(table),
            None,
        );
        (ta, select)
    }

    fn wrap(inner: SelectExpr) -> SelectExpr {
        let columns = inner
            .columns
            .iter()
            .map(|d| ColumnDeclaration::new(d.name.clone(), Expr::column(inner.alias, d.name.clone(), d.sql_type.clone()), d.sql_type.clone()))
            .collect();
        SelectExpr::new(TableAlias::new(), columns, Some(inner.into_expr()), None)
    }

    fn tsql() -> &'static dyn Language {
        default_language(DialectKind::TSql)
    }

    #[test]
    fn inner_ordering_moves_to_the_outermost_select() {
        let (ta, inner) = customers();
        let name = Expr::column(ta, "Name", SqlType::nvarchar(40));
        let inner = inner.with_order_by(vec![OrderExpr::new(OrderType::Descending, name)]);
        let inner_alias = inner.alias;
        let outer = wrap(inner);
        let outer_alias = outer.alias;

        let out = OrderByRewriter::rewrite(tsql(), &outer.into_expr()).unwrap();
        let outer = out.as_select().unwrap();
        assert_eq!(outer.order_by.len(), 1);
        assert_eq!(outer.order_by[0].order_type, OrderType::Descending);
        let col = outer.order_by[0].expr.as_column().unwrap();
        assert_eq!((col.alias, col.name.as_str()), (Some(inner_alias), "Name"));
        assert_ne!(outer_alias, inner_alias);

        let inner = outer.from.as_ref().unwrap().as_select().unwrap();
        assert!(inner.order_by.is_empty());
        assert!(inner.column("Name").is_some());
    }

    #[test]
    fn paged_inner_select_keeps_its_ordering() {
        let (ta, inner) = customers();
        let inner = inner
            .with_order_by(vec![OrderExpr::new(OrderType::Ascending, Expr::column(ta, "Id", SqlType::int()))])
            .with_take(Some(Expr::constant(5)));
        let out = OrderByRewriter::rewrite(tsql(), &wrap(inner).into_expr()).unwrap();
        let outer = out.as_select().unwrap();
        let inner = outer.from.as_ref().unwrap().as_select().unwrap();
        assert_eq!(inner.order_by.len(), 1);
        assert_eq!(outer.order_by.len(), 1);
    }

    #[test]
    fn reverse_flips_orderings_and_is_cleared() {
        let (ta, select) = customers();
        let select = select
            .with_order_by(vec![OrderExpr::new(OrderType::Ascending, Expr::column(ta, "Id", SqlType::int()))])
            .with_reverse(true);
        let out = OrderByRewriter::rewrite(tsql(), &select.into_expr()).unwrap();
        let select = out.as_select().unwrap();
        assert!(!select.reverse);
        assert_eq!(select.order_by[0].order_type, OrderType::Descending);
    }

    #[test]
    fn grouped_select_drops_inner_orderings() {
        let (ta, inner) = customers();
        let inner = inner.with_order_by(vec![OrderExpr::new(OrderType::Ascending, Expr::column(ta, "Id", SqlType::int()))]);
        let ia = inner.alias;
        let outer = wrap(inner).with_group_by(vec![Expr::column(ia, "Id", SqlType::int())]);
        let out = OrderByRewriter::rewrite(tsql(), &outer.into_expr()).unwrap();
        let outer = out.as_select().unwrap();
        assert!(outer.order_by.is_empty());
        assert!(outer.from.as_ref().unwrap().as_select().unwrap().order_by.is_empty());
    }

    #[test]
    fn unordered_tree_is_returned_as_is() {
        let (_, select) = customers();
        let tree = wrap(select).into_expr();
        assert!(same(&OrderByRewriter::rewrite(tsql(), &tree).unwrap(), &tree));
    }
}
