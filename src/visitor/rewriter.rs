use std::sync::Arc;

use crate::error::{QueryError, Result};
use crate::expr::*;

/// Bottom-up tree rewriter.
///
/// `visit` dispatches on the node kind to a hook; every hook defaults to
/// [`walk`], which visits the children and rebuilds the node only when at
/// least one child came back as a different `Arc`. Passes override just the
/// hooks they care about, and callers detect "nothing changed" with
/// `Arc::ptr_eq`.
pub trait Rewriter {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Select(_) => self.visit_select(expr),
            Expr::Projection(_) => self.visit_projection(expr),
            Expr::Join(_) => self.visit_join(expr),
            Expr::Column(_) => self.visit_column(expr),
            Expr::Table(_) => self.visit_table(expr),
            Expr::ClientJoin(_) => self.visit_client_join(expr),
            Expr::Scalar(_) | Expr::Exists(_) | Expr::In(_) => self.visit_subquery(expr),
            Expr::Aggregate(_) => self.visit_aggregate(expr),
            Expr::AggregateSubquery(_) => self.visit_aggregate_subquery(expr),
            Expr::Entity(_) => self.visit_entity(expr),
            Expr::Record(_) => self.visit_record(expr),
            Expr::Member(_) => self.visit_member(expr),
            Expr::Binary(_) => self.visit_binary(expr),
            Expr::NamedValue(_) => self.visit_named_value(expr),
            Expr::Constant(_) => self.visit_constant(expr),
            Expr::Parameter(_) => self.visit_parameter(expr),
            Expr::Query(_) => self.visit_query(expr),
            Expr::Insert(_)
            | Expr::Update(_)
            | Expr::Delete(_)
            | Expr::Batch(_)
            | Expr::Block(_)
            | Expr::If(_)
            | Expr::Declaration(_) => self.visit_command(expr),
            _ => walk(self, expr),
        }
    }

    fn visit_select(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_table(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_client_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    /// `Scalar`, `Exists` and `In`.
    fn visit_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_aggregate(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_aggregate_subquery(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_entity(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_record(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_member(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_binary(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_named_value(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }

    fn visit_constant(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_parameter(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    /// Sequence operators only have meaning to the binder.
    fn visit_query(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Query(op) => Err(QueryError::unsupported(format!("unbound query operator {}", op.name()))),
            other => Err(QueryError::unsupported(other.kind_name())),
        }
    }

    fn visit_command(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        walk(self, expr)
    }
}

pub fn visit_opt<R: Rewriter + ?Sized>(r: &mut R, expr: &Option<ExprRef>) -> Result<Option<ExprRef>> {
    match expr {
        Some(e) => Ok(Some(r.visit(e)?)),
        None => Ok(None),
    }
}

pub fn visit_list<R: Rewriter + ?Sized>(r: &mut R, list: &[ExprRef]) -> Result<Vec<ExprRef>> {
    list.iter().map(|e| r.visit(e)).collect()
}

pub fn visit_order_by<R: Rewriter + ?Sized>(r: &mut R, order: &[OrderExpr]) -> Result<Vec<OrderExpr>> {
    order
        .iter()
        .map(|o| Ok(OrderExpr::new(o.order_type, r.visit(&o.expr)?)))
        .collect()
}

pub fn visit_columns<R: Rewriter + ?Sized>(r: &mut R, columns: &[ColumnDeclaration]) -> Result<Vec<ColumnDeclaration>> {
    columns
        .iter()
        .map(|c| Ok(ColumnDeclaration::new(c.name.clone(), r.visit(&c.expr)?, c.sql_type.clone())))
        .collect()
}

pub fn same_order_by(a: &[OrderExpr], b: &[OrderExpr]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.order_type == y.order_type && same(&x.expr, &y.expr))
}

pub fn same_columns(a: &[ColumnDeclaration], b: &[ColumnDeclaration]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name && same(&x.expr, &y.expr))
}

fn visit_assignments<R: Rewriter + ?Sized>(
    r: &mut R,
    assignments: &[ColumnAssignment],
) -> Result<(Vec<ColumnAssignment>, bool)> {
    let mut changed = false;
    let mut out = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = r.visit(&a.column)?;
        let value = r.visit(&a.expr)?;
        changed |= !same(&column, &a.column) || !same(&value, &a.expr);
        out.push(ColumnAssignment { column, expr: value });
    }
    Ok((out, changed))
}

/// Visit a select in the canonical order (from, where, columns, order by,
/// group by, skip, take) and rebuild it if anything changed.
pub fn walk_select<R: Rewriter + ?Sized>(r: &mut R, expr: &ExprRef, s: &SelectExpr) -> Result<ExprRef> {
    let from = visit_opt(r, &s.from)?;
    let where_ = visit_opt(r, &s.where_)?;
    let columns = visit_columns(r, &s.columns)?;
    let order_by = visit_order_by(r, &s.order_by)?;
    let group_by = visit_list(r, &s.group_by)?;
    let skip = visit_opt(r, &s.skip)?;
    let take = visit_opt(r, &s.take)?;
    if same_opt(&from, &s.from)
        && same_opt(&where_, &s.where_)
        && same_columns(&columns, &s.columns)
        && same_order_by(&order_by, &s.order_by)
        && same_list(&group_by, &s.group_by)
        && same_opt(&skip, &s.skip)
        && same_opt(&take, &s.take)
    {
        return Ok(expr.clone());
    }
    Ok(SelectExpr {
        alias: s.alias,
        columns,
        from,
        where_,
        order_by,
        group_by,
        distinct: s.distinct,
        reverse: s.reverse,
        skip,
        take,
    }
    .into_expr())
}

/// Default traversal: visit every child and rebuild on change.
pub fn walk<R: Rewriter + ?Sized>(r: &mut R, expr: &ExprRef) -> Result<ExprRef> {
    let rebuilt = match expr.as_ref() {
        Expr::Constant(_) | Expr::Parameter(_) | Expr::Table(_) | Expr::Column(_) | Expr::Variable(_) => None,
        Expr::Query(_) => return r.visit_query(expr),
        Expr::Member(m) => {
            let object = r.visit(&m.object)?;
            (!same(&object, &m.object)).then(|| Expr::Member(MemberExpr { object, name: m.name.clone() }))
        }
        Expr::Binary(b) => {
            let left = r.visit(&b.left)?;
            let right = r.visit(&b.right)?;
            (!same(&left, &b.left) || !same(&right, &b.right)).then(|| Expr::Binary(BinaryExpr { op: b.op, left, right }))
        }
        Expr::Unary(u) => {
            let operand = r.visit(&u.operand)?;
            (!same(&operand, &u.operand)).then(|| Expr::Unary(UnaryExpr { op: u.op, operand }))
        }
        Expr::Conditional(c) => {
            let test = r.visit(&c.test)?;
            let if_true = r.visit(&c.if_true)?;
            let if_false = r.visit(&c.if_false)?;
            (!same(&test, &c.test) || !same(&if_true, &c.if_true) || !same(&if_false, &c.if_false))
                .then(|| Expr::Conditional(ConditionalExpr { test, if_true, if_false }))
        }
        Expr::Call(c) => {
            let args = visit_list(r, &c.args)?;
            (!same_list(&args, &c.args)).then(|| Expr::Call(CallExpr { method: c.method, args }))
        }
        Expr::Record(rec) => {
            let mut changed = false;
            let mut fields = Vec::with_capacity(rec.fields.len());
            for (name, e) in &rec.fields {
                let v = r.visit(e)?;
                changed |= !same(&v, e);
                fields.push((name.clone(), v));
            }
            changed.then(|| Expr::Record(RecordExpr { fields }))
        }
        Expr::Grouping(g) => {
            let key = r.visit(&g.key)?;
            let elements = r.visit(&g.elements)?;
            (!same(&key, &g.key) || !same(&elements, &g.elements)).then(|| Expr::Grouping(GroupingExpr { key, elements }))
        }
        Expr::Select(s) => return walk_select(r, expr, s),
        Expr::Join(j) => {
            let left = r.visit(&j.left)?;
            let right = r.visit(&j.right)?;
            let condition = visit_opt(r, &j.condition)?;
            (!same(&left, &j.left) || !same(&right, &j.right) || !same_opt(&condition, &j.condition))
                .then(|| Expr::Join(JoinExpr { kind: j.kind, left, right, condition }))
        }
        Expr::Projection(p) => {
            let select = r.visit(&p.select)?;
            let projector = r.visit(&p.projector)?;
            (!same(&select, &p.select) || !same(&projector, &p.projector))
                .then(|| Expr::Projection(ProjectionExpr { select, projector, aggregator: p.aggregator }))
        }
        Expr::Entity(e) => {
            let inner = r.visit(&e.expr)?;
            (!same(&inner, &e.expr)).then(|| Expr::Entity(EntityExpr { entity: e.entity.clone(), expr: inner }))
        }
        Expr::OuterJoined(o) => {
            let test = r.visit(&o.test)?;
            let inner = r.visit(&o.expr)?;
            (!same(&test, &o.test) || !same(&inner, &o.expr)).then(|| Expr::OuterJoined(OuterJoinedExpr { test, expr: inner }))
        }
        Expr::ClientJoin(c) => {
            let outer_key = visit_list(r, &c.outer_key)?;
            let inner_key = visit_list(r, &c.inner_key)?;
            let projection = r.visit(&c.projection)?;
            (!same_list(&outer_key, &c.outer_key) || !same_list(&inner_key, &c.inner_key) || !same(&projection, &c.projection))
                .then(|| Expr::ClientJoin(ClientJoinExpr { projection, outer_key, inner_key }))
        }
        Expr::Aggregate(a) => {
            let argument = visit_opt(r, &a.argument)?;
            (!same_opt(&argument, &a.argument)).then(|| Expr::Aggregate(AggregateExpr { kind: a.kind, argument, distinct: a.distinct }))
        }
        Expr::AggregateSubquery(a) => {
            let subquery = r.visit(&a.subquery)?;
            (!same(&subquery, &a.subquery)).then(|| {
                Expr::AggregateSubquery(AggregateSubqueryExpr {
                    group_by_alias: a.group_by_alias,
                    aggregate_in_group_select: a.aggregate_in_group_select.clone(),
                    subquery,
                })
            })
        }
        Expr::Scalar(s) => {
            let v = r.visit(s)?;
            (!same(&v, s)).then(|| Expr::Scalar(v))
        }
        Expr::Exists(s) => {
            let v = r.visit(s)?;
            (!same(&v, s)).then(|| Expr::Exists(v))
        }
        Expr::IsNull(s) => {
            let v = r.visit(s)?;
            (!same(&v, s)).then(|| Expr::IsNull(v))
        }
        Expr::In(i) => {
            let e = r.visit(&i.expr)?;
            let select = visit_opt(r, &i.select)?;
            let values = visit_list(r, &i.values)?;
            (!same(&e, &i.expr) || !same_opt(&select, &i.select) || !same_list(&values, &i.values))
                .then(|| Expr::In(InExpr { expr: e, select, values }))
        }
        Expr::Between(b) => {
            let e = r.visit(&b.expr)?;
            let lower = r.visit(&b.lower)?;
            let upper = r.visit(&b.upper)?;
            (!same(&e, &b.expr) || !same(&lower, &b.lower) || !same(&upper, &b.upper))
                .then(|| Expr::Between(BetweenExpr { expr: e, lower, upper }))
        }
        Expr::RowNumber(order) => {
            let v = visit_order_by(r, order)?;
            (!same_order_by(&v, order)).then(|| Expr::RowNumber(v))
        }
        Expr::NamedValue(nv) => {
            let value = r.visit(&nv.value)?;
            (!same(&value, &nv.value))
                .then(|| Expr::NamedValue(NamedValueExpr { name: nv.name.clone(), sql_type: nv.sql_type.clone(), value }))
        }
        Expr::Function(f) => match &f.args {
            Some(args) => {
                let v = visit_list(r, args)?;
                (!same_list(&v, args)).then(|| Expr::Function(FunctionExpr { name: f.name.clone(), args: Some(v) }))
            }
            None => None,
        },
        Expr::Insert(i) => {
            let table = r.visit(&i.table)?;
            let (assignments, changed) = visit_assignments(r, &i.assignments)?;
            (changed || !same(&table, &i.table)).then(|| Expr::Insert(InsertCommand { table, assignments }))
        }
        Expr::Update(u) => {
            let table = r.visit(&u.table)?;
            let where_ = r.visit(&u.where_)?;
            let (assignments, changed) = visit_assignments(r, &u.assignments)?;
            (changed || !same(&table, &u.table) || !same(&where_, &u.where_))
                .then(|| Expr::Update(UpdateCommand { table, where_, assignments }))
        }
        Expr::Delete(d) => {
            let table = r.visit(&d.table)?;
            let where_ = visit_opt(r, &d.where_)?;
            (!same(&table, &d.table) || !same_opt(&where_, &d.where_)).then(|| Expr::Delete(DeleteCommand { table, where_ }))
        }
        Expr::Batch(b) => {
            let operation = r.visit(&b.operation)?;
            (!same(&operation, &b.operation)).then(|| {
                Expr::Batch(BatchCommand { item: b.item.clone(), operation, items: b.items.clone(), batch_size: b.batch_size })
            })
        }
        Expr::Block(commands) => {
            let v = visit_list(r, commands)?;
            (!same_list(&v, commands)).then(|| Expr::Block(v))
        }
        Expr::If(i) => {
            let check = r.visit(&i.check)?;
            let if_true = r.visit(&i.if_true)?;
            let if_false = visit_opt(r, &i.if_false)?;
            (!same(&check, &i.check) || !same(&if_true, &i.if_true) || !same_opt(&if_false, &i.if_false))
                .then(|| Expr::If(IfCommand { check, if_true, if_false }))
        }
        Expr::Declaration(d) => {
            let mut changed = false;
            let mut variables = Vec::with_capacity(d.variables.len());
            for v in &d.variables {
                let e = r.visit(&v.expr)?;
                changed |= !same(&e, &v.expr);
                variables.push(VariableDeclaration { name: v.name.clone(), sql_type: v.sql_type.clone(), expr: e });
            }
            let source = r.visit(&d.source)?;
            (changed || !same(&source, &d.source)).then(|| Expr::Declaration(DeclarationCommand { variables, source }))
        }
    };
    Ok(rebuilt.map(Arc::new).unwrap_or_else(|| expr.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;
    impl Rewriter for Identity {}

    struct RenameColumns;
    impl Rewriter for RenameColumns {
        fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
            match expr.as_ref() {
                Expr::Column(c) if c.name == "A" => Ok(Arc::new(Expr::Column(ColumnExpr { name: "Z".into(), ..c.clone() }))),
                _ => Ok(expr.clone()),
            }
        }
    }

    fn sample() -> (ExprRef, ExprRef) {
        let alias = TableAlias::new();
        let a = Expr::column(alias, "A", SqlType::int());
        let b = Expr::column(alias, "B", SqlType::int());
        let untouched = Expr::equal(b.clone(), Expr::constant(2));
        let tree = Expr::and(Expr::equal(a, Expr::constant(1)), untouched.clone());
        (tree, untouched)
    }

    #[test]
    fn identity_returns_the_same_arc() {
        let (tree, _) = sample();
        let out = Identity.visit(&tree).unwrap();
        assert!(Arc::ptr_eq(&tree, &out));
    }

    #[test]
    fn unchanged_siblings_are_shared() {
        let (tree, untouched) = sample();
        let out = RenameColumns.visit(&tree).unwrap();
        assert!(!Arc::ptr_eq(&tree, &out));
        match out.as_ref() {
            Expr::Binary(b) => assert!(Arc::ptr_eq(&b.right, &untouched)),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn unbound_query_operators_are_rejected() {
        let q = crate::query::Query::from("Customer");
        let err = Identity.visit(q.expr()).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
    }
}
