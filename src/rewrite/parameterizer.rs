use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::dialect::Language;
use crate::error::Result;
use crate::expr::*;
use crate::query::Parameter;
use crate::visitor::{walk, NamedValueGatherer, Rewriter};

/// Replaces client values in the SQL part of a tree with named values.
///
/// String, date and floating point constants become `p0`, `p1`, ..; equal
/// constants share one name. Members of a batch item parameter become named
/// values carrying the member name. Integers, booleans and nulls stay inline
/// so `TOP n` and similar clauses keep their literal form. Projectors are
/// client side and are not touched.
pub struct Parameterizer<'l> {
    language: &'l dyn Language,
    taken: HashSet<String>,
    by_value: HashMap<Literal, ExprRef>,
    by_member: HashMap<(Parameter, String), ExprRef>,
    next: usize,
    context_type: Option<SqlType>,
}

impl<'l> Parameterizer<'l> {
    pub fn parameterize(language: &'l dyn Language, expr: &ExprRef) -> Result<ExprRef> {
        let taken = NamedValueGatherer::gather(expr).into_iter().map(|nv| nv.name).collect();
        let mut parameterizer = Parameterizer {
            language,
            taken,
            by_value: HashMap::new(),
            by_member: HashMap::new(),
            next: 0,
            context_type: None,
        };
        let out = parameterizer.visit(expr)?;
        trace!(dialect = parameterizer.language.name(), named_values = parameterizer.by_value.len() + parameterizer.by_member.len(), "parameterized");
        Ok(out)
    }

    fn fresh_name(&mut self, base: Option<&str>) -> String {
        if let Some(base) = base {
            if self.taken.insert(base.to_string()) {
                return base.to_string();
            }
        }
        loop {
            let name = format!("p{}", self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    fn is_parameterized(lit: &Literal) -> bool {
        matches!(lit, Literal::String(_) | Literal::DateTime(_) | Literal::Float(_))
    }

    /// Visit `expr` as the counterpart of a column of type `sql_type`.
    fn visit_typed(&mut self, expr: &ExprRef, sql_type: Option<SqlType>) -> Result<ExprRef> {
        let saved = std::mem::replace(&mut self.context_type, sql_type);
        let out = self.visit(expr);
        self.context_type = saved;
        out
    }

    fn column_type(expr: &Expr) -> Option<SqlType> {
        expr.as_column().map(|c| c.sql_type.clone())
    }

    fn visit_assignments(&mut self, assignments: &[ColumnAssignment]) -> Result<(Vec<ColumnAssignment>, bool)> {
        let mut changed = false;
        let mut out = Vec::with_capacity(assignments.len());
        for a in assignments {
            let value = self.visit_typed(&a.expr, Self::column_type(&a.column))?;
            changed |= !same(&value, &a.expr);
            out.push(ColumnAssignment { column: a.column.clone(), expr: value });
        }
        Ok((out, changed))
    }
}

impl Rewriter for Parameterizer<'_> {
    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let select = self.visit(&p.select)?;
        if same(&select, &p.select) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Projection(ProjectionExpr { select, projector: p.projector.clone(), aggregator: p.aggregator })))
    }

    fn visit_client_join(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_binary(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Binary(b) = expr.as_ref() else {
            return walk(self, expr);
        };
        if !b.op.is_comparison() {
            let saved = self.context_type.take();
            let out = walk(self, expr);
            self.context_type = saved;
            return out;
        }
        let left = self.visit_typed(&b.left, Self::column_type(&b.right))?;
        let right = self.visit_typed(&b.right, Self::column_type(&b.left))?;
        if same(&left, &b.left) && same(&right, &b.right) {
            return Ok(expr.clone());
        }
        Ok(Expr::binary(b.op, left, right))
    }

    fn visit_constant(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Constant(lit) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        if !Self::is_parameterized(lit) {
            return Ok(expr.clone());
        }
        if let Some(existing) = self.by_value.get(lit) {
            return Ok(existing.clone());
        }
        let name = self.fresh_name(None);
        let sql_type = self.context_type.clone().unwrap_or_else(|| ValueKind::of_literal(lit).default_sql_type());
        let named = Arc::new(Expr::NamedValue(NamedValueExpr { name, sql_type, value: expr.clone() }));
        self.by_value.insert(lit.clone(), named.clone());
        Ok(named)
    }

    fn visit_member(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Member(m) = expr.as_ref() else {
            return walk(self, expr);
        };
        let Expr::Parameter(item) = m.object.as_ref() else {
            return walk(self, expr);
        };
        let key = (item.clone(), m.name.clone());
        if let Some(existing) = self.by_member.get(&key) {
            return Ok(existing.clone());
        }
        let name = self.fresh_name(Some(&m.name));
        let sql_type = self.context_type.clone().unwrap_or_default();
        let named = Arc::new(Expr::NamedValue(NamedValueExpr { name, sql_type, value: expr.clone() }));
        self.by_member.insert(key, named.clone());
        Ok(named)
    }

    /// Values already named keep their name.
    fn visit_named_value(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        Ok(expr.clone())
    }

    fn visit_command(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        match expr.as_ref() {
            Expr::Insert(i) => {
                let (assignments, changed) = self.visit_assignments(&i.assignments)?;
                if !changed {
                    return Ok(expr.clone());
                }
                Ok(Arc::new(Expr::Insert(InsertCommand { table: i.table.clone(), assignments })))
            }
            Expr::Update(u) => {
                let where_ = self.visit(&u.where_)?;
                let (assignments, changed) = self.visit_assignments(&u.assignments)?;
                if !changed && same(&where_, &u.where_) {
                    return Ok(expr.clone());
                }
                Ok(Arc::new(Expr::Update(UpdateCommand { table: u.table.clone(), where_, assignments })))
            }
            _ => walk(self, expr),
        }
    }
}

/// Turns references to an outer row inside a nested query into named values
/// `n0`, `n1`, .. so the nested query can run once per outer row. Returns
/// the rewritten tree with the outer columns each name stands for.
pub struct OuterParameterizer {
    outer_alias: TableAlias,
    map: HashMap<ColumnExpr, ExprRef>,
    names: Vec<(String, ColumnExpr)>,
}

impl OuterParameterizer {
    pub fn parameterize(outer_alias: TableAlias, expr: &ExprRef) -> Result<(ExprRef, Vec<(String, ColumnExpr)>)> {
        let mut parameterizer = OuterParameterizer { outer_alias, map: HashMap::new(), names: Vec::new() };
        let out = parameterizer.visit(expr)?;
        Ok((out, parameterizer.names))
    }
}

impl Rewriter for OuterParameterizer {
    fn visit_projection(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Projection(p) = expr.as_ref() else {
            return walk(self, expr);
        };
        let select = self.visit(&p.select)?;
        if same(&select, &p.select) {
            return Ok(expr.clone());
        }
        Ok(Arc::new(Expr::Projection(ProjectionExpr { select, projector: p.projector.clone(), aggregator: p.aggregator })))
    }

    fn visit_column(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        let Expr::Column(c) = expr.as_ref() else {
            return Ok(expr.clone());
        };
        if c.alias != Some(self.outer_alias) {
            return Ok(expr.clone());
        }
        if let Some(existing) = self.map.get(c) {
            return Ok(existing.clone());
        }
        let name = format!("n{}", self.names.len());
        let named = Arc::new(Expr::NamedValue(NamedValueExpr { name: name.clone(), sql_type: c.sql_type.clone(), value: expr.clone() }));
        self.names.push((name, c.clone()));
        self.map.insert(c.clone(), named.clone());
        Ok(named)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;

    fn customers_named(name: &str, city: &str) -> (TableAlias, ExprRef) {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Customer".into(), name: "Customers".into() }));
        let where_ = Expr::or(
            Expr::equal(Expr::column(ta, "Name", SqlType::nvarchar(40)), Expr::constant(name)),
            Expr::equal(Expr::constant(city), Expr::column(ta, "City", SqlType::nvarchar(15))),
        );
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", Expr::column(ta, "Id", SqlType::int()), SqlType::int())],
            Some(table),
            Some(where_),
        )
        .with_take(Some(Expr::constant(10)));
        (ta, select.into_expr())
    }

    #[test]
    fn strings_become_typed_named_values() {
        let (_, tree) = customers_named("Alfreds", "Berlin");
        let out = Parameterizer::parameterize(default_language(DialectKind::TSql), &tree).unwrap();
        let values = NamedValueGatherer::gather(&out);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].name, "p0");
        assert_eq!(values[0].sql_type, SqlType::nvarchar(40));
        assert_eq!(values[1].sql_type, SqlType::nvarchar(15));
        assert!(matches!(out.as_select().unwrap().take.as_deref(), Some(Expr::Constant(_))));
    }

    #[test]
    fn equal_constants_share_a_name() {
        let (_, tree) = customers_named("London", "London");
        let out = Parameterizer::parameterize(default_language(DialectKind::Sqlite), &tree).unwrap();
        assert_eq!(NamedValueGatherer::gather(&out).len(), 1);
    }

    #[test]
    fn integer_only_trees_are_untouched() {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Order".into(), name: "Orders".into() }));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Id", Expr::column(ta, "Id", SqlType::int()), SqlType::int())],
            Some(table),
            Some(Expr::equal(Expr::column(ta, "Id", SqlType::int()), Expr::constant(7))),
        )
        .into_expr();
        let out = Parameterizer::parameterize(default_language(DialectKind::MySql), &select).unwrap();
        assert!(same(&out, &select));
    }

    #[test]
    fn batch_item_members_are_named_after_the_member() {
        let item = Parameter::new("item");
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Customer".into(), name: "Customers".into() }));
        let insert = Arc::new(Expr::Insert(InsertCommand {
            table,
            assignments: vec![ColumnAssignment {
                column: Expr::column(ta, "Name", SqlType::nvarchar(40)),
                expr: Expr::member(Arc::new(Expr::Parameter(item)), "Name"),
            }],
        }));
        let out = Parameterizer::parameterize(default_language(DialectKind::TSql), &insert).unwrap();
        let values = NamedValueGatherer::gather(&out);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].name, "Name");
        assert_eq!(values[0].sql_type, SqlType::nvarchar(40));
    }

    #[test]
    fn outer_columns_become_numbered_values() {
        let outer = TableAlias::new();
        let (_, nested) = customers_named("x", "y");
        let s = nested.as_select().unwrap();
        let correlated = s
            .with_where(Some(Expr::equal(
                Expr::column(outer, "CustomerId", SqlType::int()),
                s.columns[0].expr.clone(),
            )))
            .into_expr();
        let (out, names) = OuterParameterizer::parameterize(outer, &correlated).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].0, "n0");
        assert_eq!(names[0].1.name, "CustomerId");
        assert_eq!(NamedValueGatherer::gather(&out)[0].name, "n0");
    }
}
