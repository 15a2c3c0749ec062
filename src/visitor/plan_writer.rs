use std::collections::HashMap;

use crate::expr::*;

const INDENT: usize = 2;

/// Pretty printer for query trees, the text behind `get_query_plan`.
///
/// Aliases print as `A0`, `A1`, .. in the order they are first met, so two
/// translations of the same query print the same text whatever dialect
/// they target.
pub struct PlanWriter {
    out: String,
    aliases: HashMap<TableAlias, usize>,
    depth: usize,
}

impl PlanWriter {
    pub fn write(expr: &ExprRef) -> String {
        let mut writer = PlanWriter { out: String::new(), aliases: HashMap::new(), depth: 0 };
        writer.expr(expr);
        writer.out
    }

    fn alias(&mut self, alias: TableAlias) -> String {
        let next = self.aliases.len();
        let n = *self.aliases.entry(alias).or_insert(next);
        format!("A{n}")
    }

    fn push(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn line(&mut self) {
        self.out.push('\n');
        self.out.push_str(&" ".repeat(self.depth * INDENT));
    }

    fn indented(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        self.line();
        f(self);
        self.depth -= 1;
        self.line();
    }

    fn list(&mut self, items: &[ExprRef]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(item);
        }
    }

    fn order_by(&mut self, order_by: &[OrderExpr]) {
        for (i, o) in order_by.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&o.expr);
            if o.order_type == OrderType::Descending {
                self.push(" DESC");
            }
        }
    }

    fn fields(&mut self, fields: &[(String, ExprRef)]) {
        self.push("{");
        self.depth += 1;
        for (i, (name, value)) in fields.iter().enumerate() {
            if i > 0 {
                self.push(",");
            }
            self.line();
            self.push(&format!("{name} = "));
            self.expr(value);
        }
        self.depth -= 1;
        self.line();
        self.push("}");
    }

    fn source(&mut self, from: &ExprRef) {
        match from.as_ref() {
            Expr::Select(_) => {
                self.push("(");
                self.indented(|w| w.expr(from));
                self.push(")");
                if let Some(alias) = from.declared_alias() {
                    let name = self.alias(alias);
                    self.push(&format!(" AS {name}"));
                }
            }
            _ => self.expr(from),
        }
    }

    fn select(&mut self, s: &SelectExpr) {
        let name = self.alias(s.alias);
        self.push("SELECT ");
        if s.distinct {
            self.push("DISTINCT ");
        }
        if let Some(take) = &s.take {
            self.push("TOP ");
            self.expr(take);
            self.push(" ");
        }
        if s.columns.is_empty() {
            self.push("*");
        }
        for (i, c) in s.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&c.expr);
            self.push(&format!(" AS {}", c.name));
        }
        if let Some(from) = &s.from {
            self.line();
            self.push("FROM ");
            self.source(from);
        }
        if let Some(where_) = &s.where_ {
            self.line();
            self.push("WHERE ");
            self.expr(where_);
        }
        if s.has_group_by() {
            self.line();
            self.push("GROUP BY ");
            self.list(&s.group_by);
        }
        if s.has_order_by() {
            self.line();
            self.push("ORDER BY ");
            self.order_by(&s.order_by);
        }
        if let Some(skip) = &s.skip {
            self.line();
            self.push("SKIP ");
            self.expr(skip);
        }
        if s.reverse {
            self.line();
            self.push("REVERSE");
        }
        self.line();
        self.push(&format!("-- select {name}"));
    }

    fn join_kind(kind: JoinKind) -> &'static str {
        match kind {
            JoinKind::CrossJoin => "CROSS JOIN",
            JoinKind::InnerJoin => "INNER JOIN",
            JoinKind::CrossApply => "CROSS APPLY",
            JoinKind::OuterApply => "OUTER APPLY",
            JoinKind::LeftOuter | JoinKind::SingletonLeftOuter => "LEFT OUTER JOIN",
        }
    }

    fn assignments(&mut self, assignments: &[ColumnAssignment]) {
        for (i, a) in assignments.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(&a.column);
            self.push(" = ");
            self.expr(&a.expr);
        }
    }

    fn expr(&mut self, expr: &ExprRef) {
        match expr.as_ref() {
            Expr::Constant(lit) => self.push(&lit.to_string()),
            Expr::Parameter(p) => self.push(&p.name),
            Expr::Member(m) => {
                self.expr(&m.object);
                self.push(&format!(".{}", m.name));
            }
            Expr::Binary(b) => {
                self.push("(");
                self.expr(&b.left);
                self.push(&format!(" {} ", b.op.symbol()));
                self.expr(&b.right);
                self.push(")");
            }
            Expr::Unary(u) => {
                self.push(match u.op {
                    UnaryOp::Not => "NOT ",
                    UnaryOp::Negate => "-",
                });
                self.expr(&u.operand);
            }
            Expr::Conditional(c) => {
                self.push("IIF(");
                self.list(&[c.test.clone(), c.if_true.clone(), c.if_false.clone()]);
                self.push(")");
            }
            Expr::Call(c) => {
                self.push(&format!("{}(", c.method.name()));
                self.list(&c.args);
                self.push(")");
            }
            Expr::Record(r) => self.fields(&r.fields),
            Expr::Query(op) => {
                self.push(&format!("Query.{}(", op.name()));
                let children: Vec<ExprRef> = op.children().into_iter().cloned().collect();
                self.list(&children);
                self.push(")");
            }
            Expr::Grouping(g) => {
                self.push("Grouping(");
                self.expr(&g.key);
                self.push(", ");
                self.expr(&g.elements);
                self.push(")");
            }
            Expr::Table(t) => {
                let name = self.alias(t.alias);
                self.push(&format!("{} AS {name}", t.name));
            }
            Expr::Column(c) => {
                let alias = match c.alias {
                    Some(alias) => self.alias(alias),
                    None => "?".to_string(),
                };
                self.push(&format!("{alias}.Column(\"{}\")", c.name));
            }
            Expr::Select(s) => self.select(s),
            Expr::Join(j) => {
                self.source(&j.left);
                self.line();
                self.push(&format!("{} ", Self::join_kind(j.kind)));
                self.source(&j.right);
                if let Some(condition) = &j.condition {
                    self.line();
                    self.push("ON ");
                    self.expr(condition);
                }
            }
            Expr::Projection(p) => {
                match p.aggregator {
                    Some(kind) => self.push(&format!("{}(Project(", kind.name())),
                    None => self.push("Project("),
                }
                self.indented(|w| {
                    w.expr(&p.select);
                    w.push(",");
                    w.line();
                    w.expr(&p.projector);
                });
                self.push(if p.aggregator.is_some() { "))" } else { ")" });
            }
            Expr::Entity(e) => {
                self.push(&format!("new {} ", e.entity));
                self.expr(&e.expr);
            }
            Expr::OuterJoined(o) => {
                self.push("Outer(");
                self.expr(&o.test);
                self.push(", ");
                self.expr(&o.expr);
                self.push(")");
            }
            Expr::ClientJoin(c) => {
                self.push("ClientJoin(");
                self.indented(|w| {
                    w.push("OuterKey(");
                    w.list(&c.outer_key);
                    w.push("),");
                    w.line();
                    w.push("InnerKey(");
                    w.list(&c.inner_key);
                    w.push("),");
                    w.line();
                    w.expr(&c.projection);
                });
                self.push(")");
            }
            Expr::Aggregate(a) => {
                self.push(&format!("{}(", a.kind.sql_name()));
                if a.distinct {
                    self.push("DISTINCT ");
                }
                match &a.argument {
                    Some(arg) => self.expr(arg),
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expr::AggregateSubquery(a) => {
                let name = self.alias(a.group_by_alias);
                self.push(&format!("AggregateSubquery({name}, "));
                self.expr(&a.subquery);
                self.push(")");
            }
            Expr::Scalar(s) => {
                self.push("SCALAR(");
                self.indented(|w| w.expr(s));
                self.push(")");
            }
            Expr::Exists(s) => {
                self.push("EXISTS(");
                self.indented(|w| w.expr(s));
                self.push(")");
            }
            Expr::In(i) => {
                self.expr(&i.expr);
                self.push(" IN (");
                match &i.select {
                    Some(select) => self.indented(|w| w.expr(select)),
                    None => self.list(&i.values),
                }
                self.push(")");
            }
            Expr::IsNull(e) => {
                self.expr(e);
                self.push(" IS NULL");
            }
            Expr::Between(b) => {
                self.expr(&b.expr);
                self.push(" BETWEEN ");
                self.expr(&b.lower);
                self.push(" AND ");
                self.expr(&b.upper);
            }
            Expr::RowNumber(order) => {
                self.push("ROW_NUMBER() OVER(ORDER BY ");
                self.order_by(order);
                self.push(")");
            }
            Expr::NamedValue(nv) => self.push(&format!("@{}", nv.name)),
            Expr::Function(f) => {
                self.push(&format!("FUNCTION {}", f.name));
                if let Some(args) = &f.args {
                    self.push("(");
                    self.list(args);
                    self.push(")");
                }
            }
            Expr::Insert(i) => {
                self.push("INSERT INTO ");
                self.expr(&i.table);
                self.push(" SET ");
                self.assignments(&i.assignments);
            }
            Expr::Update(u) => {
                self.push("UPDATE ");
                self.expr(&u.table);
                self.push(" SET ");
                self.assignments(&u.assignments);
                self.line();
                self.push("WHERE ");
                self.expr(&u.where_);
            }
            Expr::Delete(d) => {
                self.push("DELETE FROM ");
                self.expr(&d.table);
                if let Some(where_) = &d.where_ {
                    self.line();
                    self.push("WHERE ");
                    self.expr(where_);
                }
            }
            Expr::Batch(b) => {
                self.push(&format!("Batch({}, {} items, size {}, ", b.item.name, b.items.len(), b.batch_size));
                self.indented(|w| w.expr(&b.operation));
                self.push(")");
            }
            Expr::Block(commands) => {
                self.push("Block(");
                self.indented(|w| {
                    for (i, c) in commands.iter().enumerate() {
                        if i > 0 {
                            w.push(";");
                            w.line();
                        }
                        w.expr(c);
                    }
                });
                self.push(")");
            }
            Expr::If(i) => {
                self.push("IF ");
                self.expr(&i.check);
                self.line();
                self.push("THEN ");
                self.expr(&i.if_true);
                if let Some(if_false) = &i.if_false {
                    self.line();
                    self.push("ELSE ");
                    self.expr(if_false);
                }
            }
            Expr::Declaration(d) => {
                self.push("DECLARE ");
                for (i, v) in d.variables.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push(&format!("@{} {} = ", v.name, v.sql_type));
                    self.expr(&v.expr);
                }
                self.line();
                self.expr(&d.source);
            }
            Expr::Variable(v) => self.push(&format!("@{}", v.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn customers_projection() -> ExprRef {
        let ta = TableAlias::new();
        let table = Arc::new(Expr::Table(TableExpr { alias: ta, entity: "Customer".into(), name: "Customers".into() }));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("Name", Expr::column(ta, "Name", SqlType::nvarchar(40)), SqlType::nvarchar(40))],
            Some(table),
            Some(Expr::equal(Expr::function("UPPER", vec![Expr::column(ta, "City", SqlType::nvarchar(15))]), Expr::constant("X"))),
        );
        let alias = select.alias;
        Expr::projection(select, Expr::column(alias, "Name", SqlType::nvarchar(40)), None)
    }

    #[test]
    fn aliases_are_numbered_in_first_seen_order() {
        let text = PlanWriter::write(&customers_projection());
        assert!(text.starts_with("Project("), "{text}");
        assert!(text.contains("A1.Column(\"Name\") AS Name"), "{text}");
        assert!(text.contains("Customers AS A1"), "{text}");
        assert!(text.contains("FUNCTION UPPER(A1.Column(\"City\"))"), "{text}");
        assert!(text.contains("A0.Column(\"Name\")"), "{text}");
    }

    #[test]
    fn equal_trees_print_identically() {
        assert_eq!(PlanWriter::write(&customers_projection()), PlanWriter::write(&customers_projection()));
    }

    #[test]
    fn outer_joined_and_client_join_keywords() {
        let inner = customers_projection();
        let inner_alias = inner.as_projection().unwrap().select().unwrap().alias;
        let outer_alias = TableAlias::new();
        let cj = Arc::new(Expr::ClientJoin(ClientJoinExpr {
            projection: inner,
            outer_key: vec![Expr::column(outer_alias, "Id", SqlType::int())],
            inner_key: vec![Expr::column(inner_alias, "CustomerId", SqlType::int())],
        }));
        let outer = Arc::new(Expr::OuterJoined(OuterJoinedExpr { test: Expr::column(outer_alias, "test", SqlType::int()), expr: cj }));
        let text = PlanWriter::write(&outer);
        assert!(text.starts_with("Outer(A0.Column(\"test\"), ClientJoin("), "{text}");
        assert!(text.contains("OuterKey(A0.Column(\"Id\"))"), "{text}");
    }
}
