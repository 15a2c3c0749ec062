use std::sync::Arc;

use crate::expr::{
    AggregateKind, BinaryOp, CallExpr, ConditionalExpr, ElementKind, Expr, ExprRef, Literal, Method,
    OrderType, UnaryExpr, UnaryOp,
};
use crate::query::{Lambda, Parameter, QueryOp};

/// A node of a lambda body under construction.
#[derive(Debug, Clone)]
pub struct QExpr(pub ExprRef);

fn lambda1(name: &str, f: impl FnOnce(QExpr) -> QExpr) -> Lambda {
    let p = Parameter::new(name);
    let body = f(QExpr(Arc::new(Expr::Parameter(p.clone()))));
    Lambda::new(vec![p], body.0)
}

fn lambda2(a: &str, b: &str, f: impl FnOnce(QExpr, QExpr) -> QExpr) -> Lambda {
    let pa = Parameter::new(a);
    let pb = Parameter::new(b);
    let body = f(
        QExpr(Arc::new(Expr::Parameter(pa.clone()))),
        QExpr(Arc::new(Expr::Parameter(pb.clone()))),
    );
    Lambda::new(vec![pa, pb], body.0)
}

fn op(op: QueryOp) -> QExpr {
    QExpr(Arc::new(Expr::Query(op)))
}

impl QExpr {
    pub fn lit(value: impl Into<Literal>) -> QExpr {
        QExpr(Expr::constant(value))
    }

    pub fn null() -> QExpr {
        QExpr(Expr::null())
    }

    pub fn list<L: Into<Literal>>(items: impl IntoIterator<Item = L>) -> QExpr {
        QExpr(Arc::new(Expr::Constant(Literal::List(items.into_iter().map(Into::into).collect()))))
    }

    /// Anonymous record, the `new { A = .., B = .. }` of a projection.
    pub fn record<S: Into<String>>(fields: impl IntoIterator<Item = (S, QExpr)>) -> QExpr {
        QExpr(Expr::record(fields.into_iter().map(|(n, e)| (n.into(), e.0)).collect()))
    }

    pub fn if_else(test: impl Into<QExpr>, if_true: impl Into<QExpr>, if_false: impl Into<QExpr>) -> QExpr {
        QExpr(Arc::new(Expr::Conditional(ConditionalExpr {
            test: test.into().0,
            if_true: if_true.into().0,
            if_false: if_false.into().0,
        })))
    }

    pub fn expr(&self) -> &ExprRef {
        &self.0
    }

    pub fn member(&self, name: &str) -> QExpr {
        QExpr(Expr::member(self.0.clone(), name))
    }

    fn binary(&self, op: BinaryOp, other: impl Into<QExpr>) -> QExpr {
        QExpr(Expr::binary(op, self.0.clone(), other.into().0))
    }

    fn call(&self, method: Method, extra: Vec<QExpr>) -> QExpr {
        let mut args = vec![self.0.clone()];
        args.extend(extra.into_iter().map(|e| e.0));
        QExpr(Arc::new(Expr::Call(CallExpr { method, args })))
    }

    pub fn eq(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Equal, other)
    }

    pub fn ne(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::NotEqual, other)
    }

    pub fn lt(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::LessThan, other)
    }

    pub fn le(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::LessThanOrEqual, other)
    }

    pub fn gt(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::GreaterThan, other)
    }

    pub fn ge(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::GreaterThanOrEqual, other)
    }

    pub fn and(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(&self) -> QExpr {
        QExpr(Expr::not(self.0.clone()))
    }

    pub fn neg(&self) -> QExpr {
        QExpr(Arc::new(Expr::Unary(UnaryExpr { op: UnaryOp::Negate, operand: self.0.clone() })))
    }

    pub fn add(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn mul(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn div(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn rem(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Modulo, other)
    }

    pub fn concat(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Concat, other)
    }

    pub fn coalesce(&self, other: impl Into<QExpr>) -> QExpr {
        self.binary(BinaryOp::Coalesce, other)
    }

    pub fn is_null(&self) -> QExpr {
        self.eq(QExpr::null())
    }

    pub fn is_not_null(&self) -> QExpr {
        self.ne(QExpr::null())
    }

    pub fn contains(&self, text: impl Into<QExpr>) -> QExpr {
        self.call(Method::Contains, vec![text.into()])
    }

    pub fn starts_with(&self, text: impl Into<QExpr>) -> QExpr {
        self.call(Method::StartsWith, vec![text.into()])
    }

    pub fn ends_with(&self, text: impl Into<QExpr>) -> QExpr {
        self.call(Method::EndsWith, vec![text.into()])
    }

    pub fn to_upper(&self) -> QExpr {
        self.call(Method::ToUpper, vec![])
    }

    pub fn to_lower(&self) -> QExpr {
        self.call(Method::ToLower, vec![])
    }

    pub fn trim(&self) -> QExpr {
        self.call(Method::Trim, vec![])
    }

    pub fn length(&self) -> QExpr {
        self.call(Method::Length, vec![])
    }

    /// Zero-based start, like the string API it mirrors.
    pub fn substring(&self, start: impl Into<QExpr>, length: impl Into<QExpr>) -> QExpr {
        self.call(Method::Substring, vec![start.into(), length.into()])
    }

    pub fn abs(&self) -> QExpr {
        self.call(Method::Abs, vec![])
    }

    pub fn round(&self) -> QExpr {
        self.call(Method::Round, vec![])
    }

    pub fn floor(&self) -> QExpr {
        self.call(Method::Floor, vec![])
    }

    pub fn ceiling(&self) -> QExpr {
        self.call(Method::Ceiling, vec![])
    }

    /// `value IN (list)` when `self` is a constant list, `value IN (subquery)`
    /// when it is a sequence.
    pub fn has(&self, item: impl Into<QExpr>) -> QExpr {
        op(QueryOp::Contains { source: self.0.clone(), item: item.into().0 })
    }

    pub fn is_in(&self, list: impl Into<QExpr>) -> QExpr {
        list.into().has(self.clone())
    }

    // sequence operators, usable on association members and nested queries

    pub fn filter(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::Where { source: self.0.clone(), predicate: lambda1("x", f) })
    }

    pub fn select(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::Select { source: self.0.clone(), selector: lambda1("x", f) })
    }

    pub fn select_many(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::SelectMany { source: self.0.clone(), collection: lambda1("x", f), result: None })
    }

    pub fn select_many_with(
        &self,
        collection: impl FnOnce(QExpr) -> QExpr,
        result: impl FnOnce(QExpr, QExpr) -> QExpr,
    ) -> QExpr {
        op(QueryOp::SelectMany {
            source: self.0.clone(),
            collection: lambda1("x", collection),
            result: Some(lambda2("x", "y", result)),
        })
    }

    pub fn join(
        &self,
        inner: impl Into<QExpr>,
        outer_key: impl FnOnce(QExpr) -> QExpr,
        inner_key: impl FnOnce(QExpr) -> QExpr,
        result: impl FnOnce(QExpr, QExpr) -> QExpr,
    ) -> QExpr {
        op(QueryOp::Join {
            outer: self.0.clone(),
            inner: inner.into().0,
            outer_key: lambda1("o", outer_key),
            inner_key: lambda1("i", inner_key),
            result: lambda2("o", "i", result),
        })
    }

    pub fn group_by(&self, key: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::GroupBy { source: self.0.clone(), key: lambda1("x", key), element: None })
    }

    pub fn group_by_element(
        &self,
        key: impl FnOnce(QExpr) -> QExpr,
        element: impl FnOnce(QExpr) -> QExpr,
    ) -> QExpr {
        op(QueryOp::GroupBy { source: self.0.clone(), key: lambda1("x", key), element: Some(lambda1("x", element)) })
    }

    fn ordered(&self, f: impl FnOnce(QExpr) -> QExpr, order_type: OrderType, then: bool) -> QExpr {
        op(QueryOp::OrderBy { source: self.0.clone(), key: lambda1("x", f), order_type, then })
    }

    pub fn order_by(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.ordered(f, OrderType::Ascending, false)
    }

    pub fn order_by_desc(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.ordered(f, OrderType::Descending, false)
    }

    pub fn then_by(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.ordered(f, OrderType::Ascending, true)
    }

    pub fn then_by_desc(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.ordered(f, OrderType::Descending, true)
    }

    pub fn distinct(&self) -> QExpr {
        op(QueryOp::Distinct { source: self.0.clone() })
    }

    pub fn reverse(&self) -> QExpr {
        op(QueryOp::Reverse { source: self.0.clone() })
    }

    pub fn skip(&self, count: impl Into<QExpr>) -> QExpr {
        op(QueryOp::Skip { source: self.0.clone(), count: count.into().0 })
    }

    pub fn take(&self, count: impl Into<QExpr>) -> QExpr {
        op(QueryOp::Take { source: self.0.clone(), count: count.into().0 })
    }

    pub fn element(&self, kind: ElementKind) -> QExpr {
        op(QueryOp::Element { source: self.0.clone(), kind, predicate: None })
    }

    pub fn element_where(&self, kind: ElementKind, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::Element { source: self.0.clone(), kind, predicate: Some(lambda1("x", f)) })
    }

    pub fn first(&self) -> QExpr {
        self.element(ElementKind::First)
    }

    pub fn first_or_default(&self) -> QExpr {
        self.element(ElementKind::FirstOrDefault)
    }

    pub fn single(&self) -> QExpr {
        self.element(ElementKind::Single)
    }

    pub fn single_or_default(&self) -> QExpr {
        self.element(ElementKind::SingleOrDefault)
    }

    pub fn last(&self) -> QExpr {
        self.element(ElementKind::Last)
    }

    pub fn last_or_default(&self) -> QExpr {
        self.element(ElementKind::LastOrDefault)
    }

    fn aggregate(&self, kind: AggregateKind, selector: Option<Lambda>) -> QExpr {
        op(QueryOp::Aggregate { source: self.0.clone(), kind, selector })
    }

    pub fn count(&self) -> QExpr {
        self.aggregate(AggregateKind::Count, None)
    }

    /// `Count(predicate)`.
    pub fn count_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.aggregate(AggregateKind::Count, Some(lambda1("x", f)))
    }

    pub fn sum(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.aggregate(AggregateKind::Sum, Some(lambda1("x", f)))
    }

    pub fn min(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.aggregate(AggregateKind::Min, Some(lambda1("x", f)))
    }

    pub fn max(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.aggregate(AggregateKind::Max, Some(lambda1("x", f)))
    }

    pub fn average(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        self.aggregate(AggregateKind::Average, Some(lambda1("x", f)))
    }

    pub fn any(&self) -> QExpr {
        op(QueryOp::Any { source: self.0.clone(), predicate: None })
    }

    pub fn any_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::Any { source: self.0.clone(), predicate: Some(lambda1("x", f)) })
    }

    pub fn all(&self, f: impl FnOnce(QExpr) -> QExpr) -> QExpr {
        op(QueryOp::All { source: self.0.clone(), predicate: lambda1("x", f) })
    }
}

impl From<i64> for QExpr {
    fn from(value: i64) -> Self {
        QExpr::lit(value)
    }
}

impl From<i32> for QExpr {
    fn from(value: i32) -> Self {
        QExpr::lit(value)
    }
}

impl From<f64> for QExpr {
    fn from(value: f64) -> Self {
        QExpr::lit(value)
    }
}

impl From<bool> for QExpr {
    fn from(value: bool) -> Self {
        QExpr::lit(value)
    }
}

impl From<&str> for QExpr {
    fn from(value: &str) -> Self {
        QExpr::lit(value)
    }
}

impl From<String> for QExpr {
    fn from(value: String) -> Self {
        QExpr::lit(value)
    }
}

impl From<Literal> for QExpr {
    fn from(value: Literal) -> Self {
        QExpr(Arc::new(Expr::Constant(value)))
    }
}

impl From<&QExpr> for QExpr {
    fn from(value: &QExpr) -> Self {
        value.clone()
    }
}

impl From<Query> for QExpr {
    fn from(value: Query) -> Self {
        value.root
    }
}

impl From<&Query> for QExpr {
    fn from(value: &Query) -> Self {
        value.root.clone()
    }
}

/// An immutable query over a mapped entity. Every operator returns a new
/// `Query` that shares the tree built so far.
#[derive(Debug, Clone)]
pub struct Query {
    root: QExpr,
}

impl Query {
    pub fn from(entity: &str) -> Query {
        Query { root: op(QueryOp::Source { entity: entity.to_string() }) }
    }

    fn wrap(root: QExpr) -> Query {
        Query { root }
    }

    pub fn expr(&self) -> &ExprRef {
        &self.root.0
    }

    pub fn filter(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.filter(f))
    }

    pub fn select(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.select(f))
    }

    pub fn select_many(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.select_many(f))
    }

    pub fn select_many_with(
        &self,
        collection: impl FnOnce(QExpr) -> QExpr,
        result: impl FnOnce(QExpr, QExpr) -> QExpr,
    ) -> Query {
        Self::wrap(self.root.select_many_with(collection, result))
    }

    pub fn join(
        &self,
        inner: &Query,
        outer_key: impl FnOnce(QExpr) -> QExpr,
        inner_key: impl FnOnce(QExpr) -> QExpr,
        result: impl FnOnce(QExpr, QExpr) -> QExpr,
    ) -> Query {
        Self::wrap(self.root.join(inner, outer_key, inner_key, result))
    }

    pub fn group_by(&self, key: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.group_by(key))
    }

    pub fn group_by_element(
        &self,
        key: impl FnOnce(QExpr) -> QExpr,
        element: impl FnOnce(QExpr) -> QExpr,
    ) -> Query {
        Self::wrap(self.root.group_by_element(key, element))
    }

    pub fn order_by(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.order_by(f))
    }

    pub fn order_by_desc(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.order_by_desc(f))
    }

    pub fn then_by(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.then_by(f))
    }

    pub fn then_by_desc(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.then_by_desc(f))
    }

    pub fn distinct(&self) -> Query {
        Self::wrap(self.root.distinct())
    }

    pub fn reverse(&self) -> Query {
        Self::wrap(self.root.reverse())
    }

    pub fn skip(&self, count: impl Into<QExpr>) -> Query {
        Self::wrap(self.root.skip(count))
    }

    pub fn take(&self, count: impl Into<QExpr>) -> Query {
        Self::wrap(self.root.take(count))
    }

    pub fn first(&self) -> Query {
        Self::wrap(self.root.first())
    }

    pub fn first_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.element_where(ElementKind::First, f))
    }

    pub fn first_or_default(&self) -> Query {
        Self::wrap(self.root.first_or_default())
    }

    pub fn single(&self) -> Query {
        Self::wrap(self.root.single())
    }

    pub fn single_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.element_where(ElementKind::Single, f))
    }

    pub fn single_or_default(&self) -> Query {
        Self::wrap(self.root.single_or_default())
    }

    pub fn last(&self) -> Query {
        Self::wrap(self.root.last())
    }

    pub fn last_or_default(&self) -> Query {
        Self::wrap(self.root.last_or_default())
    }

    pub fn count(&self) -> Query {
        Self::wrap(self.root.count())
    }

    pub fn count_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.count_where(f))
    }

    pub fn sum(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.sum(f))
    }

    pub fn min(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.min(f))
    }

    pub fn max(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.max(f))
    }

    pub fn average(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.average(f))
    }

    pub fn any(&self) -> Query {
        Self::wrap(self.root.any())
    }

    pub fn any_where(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.any_where(f))
    }

    pub fn all(&self, f: impl FnOnce(QExpr) -> QExpr) -> Query {
        Self::wrap(self.root.all(f))
    }

    pub fn contains(&self, item: impl Into<QExpr>) -> Query {
        Self::wrap(self.root.has(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_chain_without_touching_the_source() {
        let customers = Query::from("Customer");
        let london = customers.filter(|c| c.member("City").eq("London"));
        assert!(matches!(customers.expr().as_ref(), Expr::Query(QueryOp::Source { .. })));
        match london.expr().as_ref() {
            Expr::Query(QueryOp::Where { source, predicate }) => {
                assert!(Arc::ptr_eq(source, customers.expr()));
                assert_eq!(predicate.params.len(), 1);
            }
            other => panic!("expected Where, got {other:?}"),
        }
    }

    #[test]
    fn lambda_bodies_reference_their_own_parameter() {
        let q = Query::from("Customer").select(|c| c.member("Name"));
        match q.expr().as_ref() {
            Expr::Query(QueryOp::Select { selector, .. }) => match selector.body.as_ref() {
                Expr::Member(m) => match m.object.as_ref() {
                    Expr::Parameter(p) => assert_eq!(p, &selector.params[0]),
                    other => panic!("expected parameter, got {other:?}"),
                },
                other => panic!("expected member, got {other:?}"),
            },
            other => panic!("expected Select, got {other:?}"),
        }
    }

    #[test]
    fn is_in_builds_contains_over_the_list() {
        let e = QExpr::lit(3).is_in(QExpr::list([1, 2, 3]));
        match e.expr().as_ref() {
            Expr::Query(QueryOp::Contains { source, .. }) => {
                assert!(matches!(source.as_ref(), Expr::Constant(Literal::List(items)) if items.len() == 3))
            }
            other => panic!("expected Contains, got {other:?}"),
        }
    }

    #[test]
    fn then_by_is_marked() {
        let q = Query::from("Customer").order_by(|c| c.member("City")).then_by_desc(|c| c.member("Name"));
        match q.expr().as_ref() {
            Expr::Query(QueryOp::OrderBy { then, order_type, .. }) => {
                assert!(*then);
                assert_eq!(*order_type, OrderType::Descending);
            }
            other => panic!("expected OrderBy, got {other:?}"),
        }
    }
}
