use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::binder::{bind_member, ColumnProjector, ProjectedColumns};
use crate::error::{QueryError, Result};
use crate::expr::*;
use crate::mapping::QueryMapper;
use crate::query::{Lambda, Parameter, QueryOp};
use crate::visitor::{walk, ReferencedAliasGatherer, Rewriter};

/// Ties aggregates over a group back to the select carrying the GROUP BY.
#[derive(Debug, Clone)]
struct GroupByInfo {
    alias: TableAlias,
    element: ExprRef,
}

/// Turns LINQ-shaped operator nodes into the relational tree: every
/// operator becomes a projection over a new select, lambda parameters are
/// replaced by the projector they range over, and member accesses resolve
/// to columns.
pub struct QueryBinder<'m, 'a> {
    mapper: &'m QueryMapper<'a>,
    map: HashMap<Parameter, ExprRef>,
    group_by_map: Vec<(ExprRef, GroupByInfo)>,
    then_bys: Vec<(Lambda, OrderType)>,
    root: ExprRef,
}

impl<'m, 'a> QueryBinder<'m, 'a> {
    pub fn bind(mapper: &'m QueryMapper<'a>, expr: &ExprRef) -> Result<ExprRef> {
        let mut binder = QueryBinder {
            mapper,
            map: HashMap::new(),
            group_by_map: Vec::new(),
            then_bys: Vec::new(),
            root: expr.clone(),
        };
        binder.visit(expr)
    }

    fn is_root(&self, expr: &ExprRef) -> bool {
        same(expr, &self.root)
    }

    fn project(&self, expr: &ExprRef, alias: TableAlias, existing: &[TableAlias]) -> Result<ProjectedColumns> {
        ColumnProjector::project(expr, alias, existing)
    }

    fn bind_lambda(&mut self, lambda: &Lambda, args: &[&ExprRef]) -> Result<ExprRef> {
        for (i, arg) in args.iter().enumerate() {
            self.map.insert(lambda.param(i)?.clone(), (*arg).clone());
        }
        self.visit(&lambda.body)
    }

    fn visit_sequence(&mut self, source: &ExprRef) -> Result<ProjectionExpr> {
        let bound = self.visit(source)?;
        self.convert_to_sequence(&bound)
    }

    fn convert_to_sequence(&self, expr: &ExprRef) -> Result<ProjectionExpr> {
        match expr.as_ref() {
            Expr::Projection(p) => Ok(p.clone()),
            Expr::Grouping(g) => self.convert_to_sequence(&g.elements),
            Expr::Member(m) => match m.object.as_ref() {
                Expr::Entity(e) if self.mapper.mapping().is_association_relationship(&e.entity, &m.name) => {
                    let member = self.mapper.get_member_expression(&m.object, &e.entity, &m.name)?;
                    Ok(member.as_projection()?.clone())
                }
                Expr::Entity(e) => Err(QueryError::mapping(format!("member '{}.{}' is not a mapped association", e.entity, m.name))),
                _ => Err(QueryError::unsupported(format!("member '{}' is not a sequence", m.name))),
            },
            other => Err(QueryError::unsupported(format!("{} is not a sequence", other.kind_name()))),
        }
    }

    /// Wrap `projection` in a new select over it, carrying the extra clauses
    /// `build` sets on the fresh select.
    fn wrap(&self, projection: &ProjectionExpr, build: impl FnOnce(SelectExpr) -> SelectExpr) -> Result<ExprRef> {
        let inner = projection.select()?;
        let alias = TableAlias::new();
        let pc = self.project(&projection.projector, alias, &[inner.alias])?;
        let select = build(SelectExpr::new(alias, pc.columns, Some(projection.select.clone()), None));
        Ok(Expr::projection(select, pc.projector, None))
    }

    fn bind_where(&mut self, source: &ExprRef, predicate: &Lambda) -> Result<ExprRef> {
        let projection = self.visit_sequence(source)?;
        let where_ = self.bind_lambda(predicate, &[&projection.projector])?;
        self.wrap(&projection, |s| s.with_where(Some(where_)))
    }

    fn bind_select(&mut self, source: &ExprRef, selector: &Lambda) -> Result<ExprRef> {
        let projection = self.visit_sequence(source)?;
        let inner = projection.select()?.alias;
        let body = self.bind_lambda(selector, &[&projection.projector])?;
        let alias = TableAlias::new();
        let pc = self.project(&body, alias, &[inner])?;
        let select = SelectExpr::new(alias, pc.columns, Some(projection.select.clone()), None);
        Ok(Expr::projection(select, pc.projector, None))
    }

    fn bind_select_many(&mut self, source: &ExprRef, collection: &Lambda, result: Option<&Lambda>) -> Result<ExprRef> {
        let projection = self.visit_sequence(source)?;
        let outer_alias = projection.select()?.alias;
        let bound = self.bind_lambda(collection, &[&projection.projector])?;
        let inner = self.convert_to_sequence(&bound)?;
        let inner_alias = inner.select()?.alias;

        let correlated = ReferencedAliasGatherer::gather(&inner.select).contains(&outer_alias);
        let kind = if correlated { JoinKind::CrossApply } else { JoinKind::CrossJoin };
        let join = Expr::join(kind, projection.select.clone(), inner.select.clone(), None);

        let body = match result {
            Some(result) => self.bind_lambda(result, &[&projection.projector, &inner.projector])?,
            None => inner.projector.clone(),
        };
        let alias = TableAlias::new();
        let pc = self.project(&body, alias, &[outer_alias, inner_alias])?;
        let select = SelectExpr::new(alias, pc.columns, Some(join), None);
        Ok(Expr::projection(select, pc.projector, None))
    }

    fn bind_join(
        &mut self,
        outer: &ExprRef,
        inner: &ExprRef,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> Result<ExprRef> {
        let outer_p = self.visit_sequence(outer)?;
        let inner_p = self.visit_sequence(inner)?;
        let outer_alias = outer_p.select()?.alias;
        let inner_alias = inner_p.select()?.alias;
        let ok = self.bind_lambda(outer_key, &[&outer_p.projector])?;
        let ik = self.bind_lambda(inner_key, &[&inner_p.projector])?;
        let body = self.bind_lambda(result, &[&outer_p.projector, &inner_p.projector])?;

        let join = Expr::join(JoinKind::InnerJoin, outer_p.select.clone(), inner_p.select.clone(), Some(Expr::equal(ok, ik)));
        let alias = TableAlias::new();
        let pc = self.project(&body, alias, &[outer_alias, inner_alias])?;
        let select = SelectExpr::new(alias, pc.columns, Some(join), None);
        Ok(Expr::projection(select, pc.projector, None))
    }

    fn bind_order_by(&mut self, source: &ExprRef, key: &Lambda, order_type: OrderType) -> Result<ExprRef> {
        let then_bys = std::mem::take(&mut self.then_bys);
        let projection = self.visit_sequence(source)?;
        let mut orderings = vec![OrderExpr::new(order_type, self.bind_lambda(key, &[&projection.projector])?)];
        // then-bys were collected outermost first
        for (lambda, order_type) in then_bys.iter().rev() {
            orderings.push(OrderExpr::new(*order_type, self.bind_lambda(lambda, &[&projection.projector])?));
        }
        self.wrap(&projection, |s| s.with_order_by(orderings))
    }

    fn bind_group_by(&mut self, source: &ExprRef, key: &Lambda, element: Option<&Lambda>) -> Result<ExprRef> {
        let projection = self.visit_sequence(source)?;
        let source_alias = projection.select()?.alias;
        let key_expr = self.bind_lambda(key, &[&projection.projector])?;
        let element_expr = match element {
            Some(element) => self.bind_lambda(element, &[&projection.projector])?,
            None => projection.projector.clone(),
        };
        let key_projection = self.project(&key_expr, source_alias, &[source_alias])?;
        let group_exprs: Vec<ExprRef> = key_projection.columns.iter().map(|c| c.expr.clone()).collect();

        // bind the source a second time for the per-group element query
        let basis = self.visit_sequence(source)?;
        let basis_alias = basis.select()?.alias;
        let basis_key = self.bind_lambda(key, &[&basis.projector])?;
        let basis_key_projection = self.project(&basis_key, basis_alias, &[basis_alias])?;
        let correlation = Expr::and_all(
            basis_key_projection
                .columns
                .iter()
                .zip(&group_exprs)
                .map(|(inner, outer)| nulls_equal(&inner.expr, outer)),
        );
        let basis_element = match element {
            Some(element) => self.bind_lambda(element, &[&basis.projector])?,
            None => basis.projector.clone(),
        };
        let element_alias = TableAlias::new();
        let element_pc = self.project(&basis_element, element_alias, &[basis_alias])?;
        let element_subquery = Expr::projection(
            SelectExpr::new(element_alias, element_pc.columns, Some(basis.select.clone()), correlation),
            element_pc.projector,
            None,
        );

        let alias = TableAlias::new();
        let info = GroupByInfo { alias, element: element_expr };
        let grouping = Arc::new(Expr::Grouping(GroupingExpr { key: key_expr, elements: element_subquery.clone() }));
        let pc = self.project(&grouping, alias, &[source_alias])?;
        self.group_by_map.push((element_subquery, info.clone()));
        if let Expr::Grouping(g) = pc.projector.as_ref() {
            self.group_by_map.push((g.elements.clone(), info));
        }
        let select = SelectExpr::new(alias, pc.columns, Some(projection.select.clone()), None).with_group_by(group_exprs);
        trace!("bound group by");
        Ok(Expr::projection(select, pc.projector, None))
    }

    fn bind_element(&mut self, expr: &ExprRef, source: &ExprRef, kind: ElementKind, predicate: Option<&Lambda>) -> Result<ExprRef> {
        let projection = self.visit_sequence(source)?;
        let where_ = match predicate {
            Some(p) => Some(self.bind_lambda(p, &[&projection.projector])?),
            None => None,
        };
        let (take, reverse) = match kind {
            ElementKind::First | ElementKind::FirstOrDefault => (Some(Expr::constant(1)), false),
            ElementKind::Last | ElementKind::LastOrDefault => (Some(Expr::constant(1)), true),
            ElementKind::Single | ElementKind::SingleOrDefault => (None, false),
        };
        let projection = if take.is_some() || where_.is_some() {
            let wrapped = self.wrap(&projection, |s| s.with_where(where_).with_take(take).with_reverse(reverse))?;
            wrapped.as_projection()?.clone()
        } else {
            projection
        };
        trace!(root = self.is_root(expr), kind = kind.name(), "bound element operator");
        Ok(Arc::new(Expr::Projection(ProjectionExpr { aggregator: Some(kind), ..projection })))
    }

    fn bind_aggregate(&mut self, expr: &ExprRef, source: &ExprRef, kind: AggregateKind, selector: Option<&Lambda>) -> Result<ExprRef> {
        let mut source = source.clone();
        let mut distinct = false;
        if selector.is_none() {
            if let Expr::Query(QueryOp::Distinct { source: inner }) = source.as_ref() {
                if self.mapper.language().allows_distinct_in_aggregates() {
                    distinct = true;
                    source = inner.clone();
                }
            }
        }
        // Count(predicate) is Where(predicate).Count()
        let (selector, was_predicate) = match (kind, selector) {
            (AggregateKind::Count, Some(predicate)) => {
                source = Arc::new(Expr::Query(QueryOp::Where { source, predicate: predicate.clone() }));
                (None, true)
            }
            (_, selector) => (selector, false),
        };

        let projection = self.visit_sequence(&source)?;
        let argument = match (kind, selector) {
            (_, Some(selector)) => Some(self.bind_lambda(selector, &[&projection.projector])?),
            (AggregateKind::Count, None) => None,
            (_, None) => Some(projection.projector.clone()),
        };
        let aggregate = Arc::new(Expr::Aggregate(AggregateExpr { kind, argument, distinct }));
        let alias = TableAlias::new();
        let sql_type = TypeInference::sql_type_of(&aggregate);
        let select = SelectExpr::new(
            alias,
            vec![ColumnDeclaration::new("value", aggregate, sql_type.clone())],
            Some(projection.select.clone()),
            None,
        );
        if self.is_root(expr) {
            return Ok(Expr::projection(select, Expr::column(alias, "value", sql_type), Some(ElementKind::Single)));
        }

        let subquery = Arc::new(Expr::Scalar(select.into_expr()));
        let sequence = Arc::new(Expr::Projection(projection));
        let info = match (was_predicate, self.group_by_map.iter().find(|(e, _)| same_projection(e, &sequence))) {
            (false, Some((_, info))) => info.clone(),
            _ => return Ok(subquery),
        };
        let argument = match (kind, selector) {
            (_, Some(selector)) => Some(self.bind_lambda(selector, &[&info.element])?),
            (AggregateKind::Count, None) => None,
            (_, None) => Some(info.element.clone()),
        };
        let in_group = Arc::new(Expr::Aggregate(AggregateExpr { kind, argument, distinct }));
        Ok(Arc::new(Expr::AggregateSubquery(AggregateSubqueryExpr {
            group_by_alias: info.alias,
            aggregate_in_group_select: in_group,
            subquery,
        })))
    }

    /// A one-row, one-column projection computing `value` without a FROM.
    fn singleton_sequence(value: ExprRef, aggregator: ElementKind) -> ExprRef {
        let alias = TableAlias::new();
        let sql_type = TypeInference::sql_type_of(&value);
        let select = SelectExpr::new(alias, vec![ColumnDeclaration::new("value", value, sql_type.clone())], None, None);
        Expr::projection(select, Expr::column(alias, "value", sql_type), Some(aggregator))
    }

    fn bind_any_all(&mut self, expr: &ExprRef, source: &ExprRef, predicate: Option<&Lambda>, is_all: bool) -> Result<ExprRef> {
        if let Expr::Constant(Literal::List(items)) = source.as_ref() {
            let predicate = predicate.ok_or_else(|| QueryError::unsupported("Any over a constant list without a predicate"))?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(self.bind_lambda(predicate, &[&Expr::constant(item.clone())])?);
            }
            let combine = if is_all { Expr::and } else { Expr::or };
            let result = parts.into_iter().reduce(combine).unwrap_or_else(|| Expr::constant(is_all));
            return Ok(if self.is_root(expr) { Self::singleton_sequence(result, ElementKind::SingleOrDefault) } else { result });
        }

        let projection = self.visit_sequence(source)?;
        let where_ = match predicate {
            Some(p) => {
                let bound = self.bind_lambda(p, &[&projection.projector])?;
                Some(if is_all { Expr::not(bound) } else { bound })
            }
            None => None,
        };
        let filtered = self.wrap(&projection, |s| s.with_where(where_))?;
        let filtered = filtered.as_projection()?;
        let exists = Arc::new(Expr::Exists(filtered.select.clone()));
        let result = if is_all { Expr::not(exists) } else { exists };
        if !self.is_root(expr) {
            return Ok(result);
        }
        if self.mapper.language().allows_subquery_in_select_without_from() {
            return Ok(Self::singleton_sequence(result, ElementKind::SingleOrDefault));
        }
        // count rows instead of selecting EXISTS without a FROM
        let select = filtered.select()?;
        let count = Arc::new(Expr::Aggregate(AggregateExpr { kind: AggregateKind::Count, argument: None, distinct: false }));
        let counted = select.with_columns(vec![ColumnDeclaration::new("value", count, SqlType::int())]);
        let column = Expr::column(counted.alias, "value", SqlType::int());
        let test = if is_all {
            Expr::equal(column, Expr::constant(0))
        } else {
            Expr::binary(BinaryOp::GreaterThan, column, Expr::constant(0))
        };
        Ok(Expr::projection(counted, test, Some(ElementKind::Single)))
    }

    fn bind_contains(&mut self, expr: &ExprRef, source: &ExprRef, item: &ExprRef) -> Result<ExprRef> {
        let result = match source.as_ref() {
            Expr::Constant(Literal::List(values)) => {
                let item = self.visit(item)?;
                Arc::new(Expr::In(InExpr {
                    expr: item,
                    select: None,
                    values: values.iter().cloned().map(Expr::constant).collect(),
                }))
            }
            _ => {
                let projection = self.visit_sequence(source)?;
                let item = self.visit(item)?;
                Arc::new(Expr::In(InExpr { expr: item, select: Some(projection.select.clone()), values: Vec::new() }))
            }
        };
        Ok(if self.is_root(expr) { Self::singleton_sequence(result, ElementKind::SingleOrDefault) } else { result })
    }

    fn bind_operator(&mut self, expr: &ExprRef, op: &QueryOp) -> Result<ExprRef> {
        match op {
            QueryOp::Source { entity } => self.mapper.get_query_expression(entity),
            QueryOp::Where { source, predicate } => self.bind_where(source, predicate),
            QueryOp::Select { source, selector } => self.bind_select(source, selector),
            QueryOp::SelectMany { source, collection, result } => self.bind_select_many(source, collection, result.as_ref()),
            QueryOp::Join { outer, inner, outer_key, inner_key, result } => self.bind_join(outer, inner, outer_key, inner_key, result),
            QueryOp::GroupBy { source, key, element } => self.bind_group_by(source, key, element.as_ref()),
            QueryOp::OrderBy { source, key, order_type, then: false } => self.bind_order_by(source, key, *order_type),
            QueryOp::OrderBy { source, key, order_type, then: true } => {
                self.then_bys.push((key.clone(), *order_type));
                self.visit(source)
            }
            QueryOp::Distinct { source } => {
                let projection = self.visit_sequence(source)?;
                self.wrap(&projection, |s| s.with_distinct(true))
            }
            QueryOp::Reverse { source } => {
                let projection = self.visit_sequence(source)?;
                self.wrap(&projection, |s| s.with_reverse(true))
            }
            QueryOp::Skip { source, count } => {
                let projection = self.visit_sequence(source)?;
                let count = self.visit(count)?;
                self.wrap(&projection, |s| s.with_skip(Some(count)))
            }
            QueryOp::Take { source, count } => {
                let projection = self.visit_sequence(source)?;
                let count = self.visit(count)?;
                self.wrap(&projection, |s| s.with_take(Some(count)))
            }
            QueryOp::Element { source, kind, predicate } => self.bind_element(expr, source, *kind, predicate.as_ref()),
            QueryOp::Aggregate { source, kind, selector } => self.bind_aggregate(expr, source, *kind, selector.as_ref()),
            QueryOp::Any { source, predicate } => self.bind_any_all(expr, source, predicate.as_ref(), false),
            QueryOp::All { source, predicate } => self.bind_any_all(expr, source, Some(predicate), true),
            QueryOp::Contains { source, item } => self.bind_contains(expr, source, item),
        }
    }
}

/// Group element queries are matched by identity of their select, since
/// the projection wrapper is rebuilt when it is taken apart.
fn same_projection(a: &ExprRef, b: &ExprRef) -> bool {
    match (a.as_ref(), b.as_ref()) {
        (Expr::Projection(x), Expr::Projection(y)) => same(&x.select, &y.select),
        _ => false,
    }
}

/// `a = b OR (a IS NULL AND b IS NULL)`
fn nulls_equal(a: &ExprRef, b: &ExprRef) -> ExprRef {
    Expr::or(Expr::equal(a.clone(), b.clone()), Expr::and(Expr::is_null(a.clone()), Expr::is_null(b.clone())))
}

impl Rewriter for QueryBinder<'_, '_> {
    fn visit_query(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Query(op) => self.bind_operator(expr, op),
            other => Err(QueryError::unsupported(other.kind_name())),
        }
    }

    fn visit_parameter(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Parameter(p) => self
                .map
                .get(p)
                .cloned()
                .ok_or_else(|| QueryError::unsupported(format!("unbound parameter '{}'", p.name))),
            _ => Ok(expr.clone()),
        }
    }

    fn visit_member(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Member(m) = expr.as_ref() else {
            return walk(self, expr);
        };
        let source = self.visit(&m.object)?;
        Ok(bind_member(&source, &m.name))
    }
}
