use std::collections::HashMap;

use crate::expr::{Expr, TableAlias};

/// Structural equality of two trees. Aliases declared inside the compared
/// trees are matched up positionally, so two independently built copies of
/// the same query compare equal.
#[derive(Default)]
pub struct ExprComparer {
    aliases: HashMap<TableAlias, TableAlias>,
}

impl ExprComparer {
    pub fn are_equal(a: &Expr, b: &Expr) -> bool {
        ExprComparer::default().compare(a, b)
    }

    /// Like `are_equal`, with some aliases already known to correspond.
    pub fn are_equal_with(a: &Expr, b: &Expr, aliases: impl IntoIterator<Item = (TableAlias, TableAlias)>) -> bool {
        ExprComparer { aliases: aliases.into_iter().collect() }.compare(a, b)
    }

    fn compare(&mut self, a: &Expr, b: &Expr) -> bool {
        if std::ptr::eq(a, b) {
            return true;
        }
        if !self.same_shape(a, b) {
            return false;
        }
        let (ca, cb) = (a.children(), b.children());
        ca.len() == cb.len() && ca.iter().zip(cb.iter()).all(|(x, y)| self.compare(x, y))
    }

    fn alias_eq(&self, a: TableAlias, b: TableAlias) -> bool {
        self.aliases.get(&a).copied().unwrap_or(a) == b
    }

    fn opt_alias_eq(&self, a: Option<TableAlias>, b: Option<TableAlias>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => self.alias_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Compare everything about a node except its children, registering
    /// alias correspondences for declared sources.
    fn same_shape(&mut self, a: &Expr, b: &Expr) -> bool {
        match (a, b) {
            (Expr::Constant(x), Expr::Constant(y)) => x == y,
            (Expr::Parameter(x), Expr::Parameter(y)) => x == y,
            (Expr::Member(x), Expr::Member(y)) => x.name == y.name,
            (Expr::Binary(x), Expr::Binary(y)) => x.op == y.op,
            (Expr::Unary(x), Expr::Unary(y)) => x.op == y.op,
            (Expr::Conditional(_), Expr::Conditional(_)) => true,
            (Expr::Call(x), Expr::Call(y)) => x.method == y.method,
            (Expr::Record(x), Expr::Record(y)) => {
                x.fields.len() == y.fields.len() && x.fields.iter().zip(&y.fields).all(|((n1, _), (n2, _))| n1 == n2)
            }
            (Expr::Query(_), Expr::Query(_)) => false,
            (Expr::Grouping(_), Expr::Grouping(_)) => true,
            (Expr::Table(x), Expr::Table(y)) => {
                if x.entity != y.entity || x.name != y.name {
                    return false;
                }
                self.aliases.insert(x.alias, y.alias);
                true
            }
            (Expr::Column(x), Expr::Column(y)) => x.name == y.name && self.opt_alias_eq(x.alias, y.alias),
            (Expr::Select(x), Expr::Select(y)) => {
                let same = x.distinct == y.distinct
                    && x.reverse == y.reverse
                    && x.from.is_some() == y.from.is_some()
                    && x.where_.is_some() == y.where_.is_some()
                    && x.skip.is_some() == y.skip.is_some()
                    && x.take.is_some() == y.take.is_some()
                    && x.group_by.len() == y.group_by.len()
                    && x.columns.len() == y.columns.len()
                    && x.columns.iter().zip(&y.columns).all(|(c, d)| c.name == d.name)
                    && x.order_by.len() == y.order_by.len()
                    && x.order_by.iter().zip(&y.order_by).all(|(o, p)| o.order_type == p.order_type);
                if same {
                    self.aliases.insert(x.alias, y.alias);
                }
                same
            }
            (Expr::Join(x), Expr::Join(y)) => x.kind == y.kind && x.condition.is_some() == y.condition.is_some(),
            (Expr::Projection(x), Expr::Projection(y)) => x.aggregator == y.aggregator,
            (Expr::Entity(x), Expr::Entity(y)) => x.entity == y.entity,
            (Expr::OuterJoined(_), Expr::OuterJoined(_)) => true,
            (Expr::ClientJoin(x), Expr::ClientJoin(y)) => x.outer_key.len() == y.outer_key.len(),
            (Expr::Aggregate(x), Expr::Aggregate(y)) => {
                x.kind == y.kind && x.distinct == y.distinct && x.argument.is_some() == y.argument.is_some()
            }
            (Expr::AggregateSubquery(x), Expr::AggregateSubquery(y)) => self.alias_eq(x.group_by_alias, y.group_by_alias),
            (Expr::Scalar(_), Expr::Scalar(_)) | (Expr::Exists(_), Expr::Exists(_)) | (Expr::IsNull(_), Expr::IsNull(_)) => true,
            (Expr::In(x), Expr::In(y)) => x.select.is_some() == y.select.is_some() && x.values.len() == y.values.len(),
            (Expr::Between(_), Expr::Between(_)) => true,
            (Expr::RowNumber(x), Expr::RowNumber(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(o, p)| o.order_type == p.order_type)
            }
            (Expr::NamedValue(x), Expr::NamedValue(y)) => x.name == y.name,
            (Expr::Function(x), Expr::Function(y)) => {
                x.name == y.name && x.args.as_ref().map(Vec::len) == y.args.as_ref().map(Vec::len)
            }
            (Expr::Insert(_), Expr::Insert(_)) | (Expr::Update(_), Expr::Update(_)) => true,
            (Expr::Delete(x), Expr::Delete(y)) => x.where_.is_some() == y.where_.is_some(),
            (Expr::Batch(x), Expr::Batch(y)) => x.item == y.item && x.batch_size == y.batch_size,
            (Expr::Block(_), Expr::Block(_)) => true,
            (Expr::If(x), Expr::If(y)) => x.if_false.is_some() == y.if_false.is_some(),
            (Expr::Declaration(x), Expr::Declaration(y)) => {
                x.variables.len() == y.variables.len() && x.variables.iter().zip(&y.variables).all(|(v, w)| v.name == w.name)
            }
            (Expr::Variable(x), Expr::Variable(y)) => x.name == y.name,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::expr::{ColumnDeclaration, SelectExpr, SqlType, TableExpr};

    fn customers_named(name: &str) -> SelectExpr {
        let t = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: t, entity: "Customer".into(), name: "Customers".into() }));
        let col = Expr::column(t, "Name", SqlType::nvarchar(40));
        SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Name", col.clone(), SqlType::nvarchar(40))],
            Some(table),
            Some(Expr::equal(col, Expr::constant(name))),
        )
    }

    #[test]
    fn independently_built_copies_are_equal() {
        let a = customers_named("Ann");
        let b = customers_named("Ann");
        assert_ne!(a.alias, b.alias);
        assert!(ExprComparer::are_equal(&Expr::Select(a), &Expr::Select(b)));
    }

    #[test]
    fn different_constants_differ() {
        let a = customers_named("Ann");
        let b = customers_named("Bob");
        assert!(!ExprComparer::are_equal(&Expr::Select(a), &Expr::Select(b)));
    }

    #[test]
    fn columns_of_unrelated_aliases_differ() {
        let a = Expr::column(TableAlias::new(), "Id", SqlType::int());
        let b = Expr::column(TableAlias::new(), "Id", SqlType::int());
        assert!(!ExprComparer::are_equal(&a, &b));
        let (x, y) = match (a.as_ref(), b.as_ref()) {
            (Expr::Column(x), Expr::Column(y)) => (x.alias.unwrap(), y.alias.unwrap()),
            _ => unreachable!(),
        };
        assert!(ExprComparer::are_equal_with(&a, &b, [(x, y)]));
    }
}
