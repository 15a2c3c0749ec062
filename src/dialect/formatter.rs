use std::collections::HashMap;

use crate::dialect::Language;
use crate::error::{QueryError, Result};
use crate::expr::{
    AggregateExpr, BinaryExpr, BinaryOp, CallExpr, DeclarationCommand, Expr, ExprRef, JoinExpr, JoinKind, Literal,
    Method, OrderType, SelectExpr, TableAlias, UnaryOp,
};

/// How `Skip`/`Take` are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `SELECT TOP (n)`; skips must be rewritten away first.
    Top,
    /// `LIMIT skip, take`
    Limit,
    /// `LIMIT take OFFSET skip`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`, needs an ORDER BY.
    OffsetFetch,
    /// `FETCH FIRST n ROWS ONLY`; skips must be rewritten away first.
    FetchFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStyle {
    Plus,
    Pipes,
    Ampersand,
    Function,
}

/// Names of the scalar functions that differ between dialects.
#[derive(Debug, Clone, Copy)]
pub struct FunctionNames {
    pub upper: &'static str,
    pub lower: &'static str,
    pub trim: &'static str,
    pub length: &'static str,
    pub substring: &'static str,
    pub floor: &'static str,
    /// Empty when the dialect has none; written as a negated floor.
    pub ceiling: &'static str,
}

/// Everything the formatter needs to know about a dialect's syntax.
#[derive(Debug, Clone, Copy)]
pub struct FormatterConfig {
    pub parameter_prefix: &'static str,
    pub limit: LimitStyle,
    pub concat: ConcatStyle,
    pub functions: FunctionNames,
    /// `[Customers] AS t0` rather than `Customers t0`.
    pub table_alias_as: bool,
    /// Written in place of the FROM clause of a select without a source.
    pub dummy_from: Option<&'static str>,
    /// `(a JOIN b ON ..) JOIN c ON ..`
    pub parenthesize_joins: bool,
    /// `FROM a, b` instead of `CROSS JOIN`.
    pub comma_cross_join: bool,
    /// `IIF(test, a, b)` instead of `CASE WHEN`.
    pub iif: bool,
    /// `a MOD b` instead of `a % b`.
    pub mod_keyword: bool,
    /// `N'..'` string literals.
    pub unicode_strings: bool,
    pub date_delimiter: char,
    pub true_value: &'static str,
    pub false_value: &'static str,
}

impl FormatterConfig {
    pub const STANDARD: FormatterConfig = FormatterConfig {
        parameter_prefix: "@",
        limit: LimitStyle::LimitOffset,
        concat: ConcatStyle::Pipes,
        functions: FunctionNames {
            upper: "UPPER",
            lower: "LOWER",
            trim: "TRIM",
            length: "LENGTH",
            substring: "SUBSTR",
            floor: "FLOOR",
            ceiling: "CEIL",
        },
        table_alias_as: true,
        dummy_from: None,
        parenthesize_joins: false,
        comma_cross_join: false,
        iif: false,
        mod_keyword: false,
        unicode_strings: false,
        date_delimiter: '\'',
        true_value: "1",
        false_value: "0",
    };
}

/// Writes a relational tree as SQL text for one language.
///
/// Aliases get display names `t0`, `t1`, ... in the order they are first
/// written. Columns without a bound alias, nodes that only make sense on
/// the client, and constructs the language cannot express are errors.
pub struct SqlFormatter<'a> {
    language: &'a dyn Language,
    config: FormatterConfig,
    sb: String,
    depth: usize,
    aliases: HashMap<TableAlias, String>,
    hide_column_aliases: bool,
}

impl<'a> SqlFormatter<'a> {
    pub fn format(expr: &Expr, language: &'a dyn Language) -> Result<String> {
        let mut f = SqlFormatter {
            language,
            config: language.formatter_config(),
            sb: String::new(),
            depth: 0,
            aliases: HashMap::new(),
            hide_column_aliases: false,
        };
        match expr {
            Expr::Projection(p) => f.write_select(p.select()?, None)?,
            Expr::Select(s) => f.write_select(s, None)?,
            e if e.is_command() => f.write_command(e)?,
            e => f.write_value(e)?,
        }
        Ok(f.sb)
    }

    fn unsupported(&self, node: impl Into<String>) -> QueryError {
        QueryError::unsupported_in(node, self.language.name())
    }

    fn write(&mut self, text: &str) {
        self.sb.push_str(text);
    }

    fn newline(&mut self) {
        self.sb.push('\n');
        for _ in 0..self.depth {
            self.sb.push_str("  ");
        }
    }

    fn alias_name(&mut self, alias: TableAlias) -> String {
        let next = self.aliases.len();
        self.aliases.entry(alias).or_insert_with(|| format!("t{next}")).clone()
    }

    fn write_alias_declaration(&mut self, alias: TableAlias) {
        let name = self.alias_name(alias);
        if self.config.table_alias_as {
            self.write(" AS ");
        } else {
            self.write(" ");
        }
        self.write(&name);
    }

    // SELECT

    fn write_select(&mut self, s: &SelectExpr, assignments: Option<&DeclarationCommand>) -> Result<()> {
        self.write("SELECT ");
        if s.distinct {
            self.write("DISTINCT ");
        }
        self.write_top(s)?;
        match assignments {
            Some(decl) => {
                for (i, v) in decl.variables.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write(&format!("{}{} = ", self.config.parameter_prefix, v.name));
                    self.write_value(&v.expr)?;
                }
            }
            None if s.columns.is_empty() => self.write("NULL"),
            None => {
                for (i, c) in s.columns.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write_value(&c.expr)?;
                    let same_name = matches!(c.expr.as_ref(), Expr::Column(col) if col.name == c.name);
                    if !same_name {
                        self.write(" AS ");
                        self.write(&self.language.quote(&c.name));
                    }
                }
            }
        }
        if let Some(from) = &s.from {
            self.newline();
            self.write("FROM ");
            self.write_source(from)?;
        } else if let Some(dummy) = self.config.dummy_from {
            self.newline();
            self.write(dummy);
        }
        if let Some(where_) = &s.where_ {
            self.newline();
            self.write("WHERE ");
            self.write_predicate(where_)?;
        }
        if s.has_group_by() {
            self.newline();
            self.write("GROUP BY ");
            for (i, g) in s.group_by.iter().enumerate() {
                if i > 0 {
                    self.write(", ");
                }
                self.write_value(g)?;
            }
        }
        if s.has_order_by() {
            self.newline();
            self.write("ORDER BY ");
            for (i, o) in s.order_by.iter().enumerate() {
                if i > 0 {
                    self.write(", ");
                }
                self.write_value(&o.expr)?;
                if o.order_type == OrderType::Descending {
                    self.write(" DESC");
                }
            }
        }
        self.write_paging(s)
    }

    fn write_top(&mut self, s: &SelectExpr) -> Result<()> {
        let Some(take) = &s.take else {
            return Ok(());
        };
        let top = match self.config.limit {
            LimitStyle::Top => true,
            LimitStyle::OffsetFetch => s.skip.is_none(),
            _ => false,
        };
        if top {
            if s.skip.is_some() {
                return Err(self.unsupported("Skip"));
            }
            self.write("TOP (");
            self.write_value(take)?;
            self.write(") ");
        }
        Ok(())
    }

    fn write_paging(&mut self, s: &SelectExpr) -> Result<()> {
        match (self.config.limit, &s.skip, &s.take) {
            (_, None, None) => Ok(()),
            (LimitStyle::Top, Some(_), _) | (LimitStyle::FetchFirst, Some(_), _) => Err(self.unsupported("Skip")),
            (LimitStyle::Top, None, Some(_)) => Ok(()),
            (LimitStyle::Limit, skip, take) => {
                self.newline();
                self.write("LIMIT ");
                if let Some(skip) = skip {
                    self.write_value(skip)?;
                    self.write(", ");
                }
                match take {
                    Some(take) => self.write_value(take),
                    None => {
                        self.write("18446744073709551615");
                        Ok(())
                    }
                }
            }
            (LimitStyle::LimitOffset, skip, take) => {
                self.newline();
                self.write("LIMIT ");
                match take {
                    Some(take) => self.write_value(take)?,
                    None => self.write("-1"),
                }
                if let Some(skip) = skip {
                    self.write(" OFFSET ");
                    self.write_value(skip)?;
                }
                Ok(())
            }
            (LimitStyle::OffsetFetch, None, Some(_)) => Ok(()),
            (LimitStyle::OffsetFetch, Some(skip), take) => {
                if !s.has_order_by() {
                    return Err(self.unsupported("Skip without OrderBy"));
                }
                self.newline();
                self.write("OFFSET ");
                self.write_value(skip)?;
                self.write(" ROWS");
                if let Some(take) = take {
                    self.write(" FETCH NEXT ");
                    self.write_value(take)?;
                    self.write(" ROWS ONLY");
                }
                Ok(())
            }
            (LimitStyle::FetchFirst, None, Some(take)) => {
                self.newline();
                self.write("FETCH FIRST ");
                self.write_value(take)?;
                self.write(" ROWS ONLY");
                Ok(())
            }
        }
    }

    fn write_source(&mut self, source: &ExprRef) -> Result<()> {
        match source.as_ref() {
            Expr::Table(t) => {
                self.write(&self.language.quote(&t.name));
                self.write_alias_declaration(t.alias);
                Ok(())
            }
            Expr::Select(s) => {
                self.write("(");
                self.depth += 1;
                self.newline();
                self.write_select(s, None)?;
                self.depth -= 1;
                self.newline();
                self.write(")");
                self.write_alias_declaration(s.alias);
                Ok(())
            }
            Expr::Join(j) => self.write_join(j),
            other => Err(self.unsupported(format!("{} as a FROM source", other.kind_name()))),
        }
    }

    fn write_join(&mut self, j: &JoinExpr) -> Result<()> {
        let wrap_left = self.config.parenthesize_joins && matches!(j.left.as_ref(), Expr::Join(_));
        if wrap_left {
            self.write("(");
        }
        self.write_source(&j.left)?;
        if wrap_left {
            self.write(")");
        }
        match j.kind {
            JoinKind::CrossJoin if self.config.comma_cross_join => self.write(", "),
            JoinKind::CrossJoin => {
                self.newline();
                self.write("CROSS JOIN ");
            }
            JoinKind::InnerJoin => {
                self.newline();
                self.write("INNER JOIN ");
            }
            JoinKind::LeftOuter | JoinKind::SingletonLeftOuter => {
                self.newline();
                self.write("LEFT OUTER JOIN ");
            }
            JoinKind::CrossApply | JoinKind::OuterApply if !self.language.supports_apply() => {
                return Err(self.unsupported(format!("{:?}", j.kind)));
            }
            JoinKind::CrossApply => {
                self.newline();
                self.write("CROSS APPLY ");
            }
            JoinKind::OuterApply => {
                self.newline();
                self.write("OUTER APPLY ");
            }
        }
        self.write_source(&j.right)?;
        if matches!(j.kind, JoinKind::InnerJoin | JoinKind::LeftOuter | JoinKind::SingletonLeftOuter) {
            self.depth += 1;
            self.newline();
            self.write("ON ");
            match &j.condition {
                Some(condition) => self.write_predicate(condition)?,
                None => self.write("1 = 1"),
            }
            self.depth -= 1;
        }
        Ok(())
    }

    fn write_subquery(&mut self, select: &ExprRef) -> Result<()> {
        let s = match select.as_ref() {
            Expr::Select(s) => s,
            Expr::Projection(p) => p.select()?,
            other => return Err(QueryError::internal(format!("subquery over {}", other.kind_name()))),
        };
        self.write("(");
        self.depth += 1;
        self.newline();
        self.write_select(s, None)?;
        self.depth -= 1;
        self.newline();
        self.write(")");
        Ok(())
    }

    // expressions

    fn is_predicate(expr: &Expr) -> bool {
        match expr {
            Expr::Binary(b) => b.op.is_predicate(),
            Expr::Unary(u) => u.op == UnaryOp::Not,
            Expr::Call(c) => c.method.is_predicate(),
            Expr::Exists(_) | Expr::In(_) | Expr::IsNull(_) | Expr::Between(_) => true,
            _ => false,
        }
    }

    /// Write an expression where the grammar expects a condition.
    fn write_predicate(&mut self, expr: &Expr) -> Result<()> {
        if Self::is_predicate(expr) {
            return self.write_expr(expr);
        }
        match expr {
            Expr::Constant(Literal::Bool(true)) => self.write("1 = 1"),
            Expr::Constant(Literal::Bool(false)) => self.write("1 = 0"),
            _ => {
                self.write_expr(expr)?;
                self.write(" <> 0");
            }
        }
        Ok(())
    }

    /// Write an expression where the grammar expects a value.
    fn write_value(&mut self, expr: &Expr) -> Result<()> {
        if !Self::is_predicate(expr) {
            return self.write_expr(expr);
        }
        let (t, f) = (self.config.true_value, self.config.false_value);
        if self.config.iif {
            self.write("IIF(");
            self.write_predicate(expr)?;
            self.write(&format!(", {t}, {f})"));
        } else {
            self.write("CASE WHEN ");
            self.write_predicate(expr)?;
            self.write(&format!(" THEN {t} ELSE {f} END"));
        }
        Ok(())
    }

    fn write_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Constant(lit) => self.write_literal(lit),
            Expr::Column(c) => {
                let Some(alias) = c.alias else {
                    return Err(QueryError::UnboundColumn { alias: "<none>".into(), name: c.name.clone() });
                };
                if !self.hide_column_aliases {
                    let name = self.alias_name(alias);
                    self.write(&name);
                    self.write(".");
                }
                self.write(&self.language.quote(&c.name));
                Ok(())
            }
            Expr::NamedValue(nv) => {
                self.write(&format!("{}{}", self.config.parameter_prefix, nv.name));
                Ok(())
            }
            Expr::Variable(v) => {
                self.write(&format!("{}{}", self.config.parameter_prefix, v.name));
                Ok(())
            }
            Expr::Binary(b) => self.write_binary(b),
            Expr::Unary(u) => match u.op {
                UnaryOp::Not => match u.operand.as_ref() {
                    Expr::IsNull(inner) => {
                        self.write_operand(inner, 4, false)?;
                        self.write(" IS NOT NULL");
                        Ok(())
                    }
                    operand => {
                        self.write("NOT ");
                        if Self::precedence(operand) <= 3 {
                            self.write("(");
                            self.write_predicate(operand)?;
                            self.write(")");
                            Ok(())
                        } else {
                            self.write_predicate(operand)
                        }
                    }
                },
                UnaryOp::Negate => {
                    self.write("-");
                    self.write_operand(&u.operand, 7, false)
                }
            },
            Expr::Conditional(c) => {
                if self.config.iif {
                    self.write("IIF(");
                    self.write_predicate(&c.test)?;
                    self.write(", ");
                    self.write_value(&c.if_true)?;
                    self.write(", ");
                    self.write_value(&c.if_false)?;
                    self.write(")");
                } else {
                    self.write("CASE WHEN ");
                    self.write_predicate(&c.test)?;
                    self.write(" THEN ");
                    self.write_value(&c.if_true)?;
                    self.write(" ELSE ");
                    self.write_value(&c.if_false)?;
                    self.write(" END");
                }
                Ok(())
            }
            Expr::Call(c) => self.write_call(c),
            Expr::Function(f) => {
                self.write(&f.name);
                if let Some(args) = &f.args {
                    self.write("(");
                    self.write_list(args)?;
                    self.write(")");
                }
                Ok(())
            }
            Expr::Aggregate(a) => self.write_aggregate(a),
            Expr::AggregateSubquery(a) => self.write_expr(&a.subquery),
            Expr::Scalar(select) => self.write_subquery(select),
            Expr::Exists(select) => {
                self.write("EXISTS");
                self.write_subquery(select)
            }
            Expr::In(i) => {
                match (&i.select, i.values.is_empty()) {
                    (Some(select), _) => {
                        self.write_operand(&i.expr, 4, false)?;
                        self.write(" IN ");
                        self.write_subquery(select)?;
                    }
                    (None, true) => self.write("0 <> 0"),
                    (None, false) => {
                        self.write_operand(&i.expr, 4, false)?;
                        self.write(" IN (");
                        self.write_list(&i.values)?;
                        self.write(")");
                    }
                }
                Ok(())
            }
            Expr::IsNull(inner) => {
                self.write_operand(inner, 4, false)?;
                self.write(" IS NULL");
                Ok(())
            }
            Expr::Between(b) => {
                self.write_operand(&b.expr, 4, false)?;
                self.write(" BETWEEN ");
                self.write_operand(&b.lower, 4, false)?;
                self.write(" AND ");
                self.write_operand(&b.upper, 4, false)
            }
            Expr::RowNumber(order) => {
                self.write("ROW_NUMBER() OVER(ORDER BY ");
                if order.is_empty() {
                    match self.config.dummy_from {
                        Some(dummy) => {
                            self.write("(SELECT 1 ");
                            self.write(dummy);
                            self.write(")");
                        }
                        None => self.write("(SELECT 1)"),
                    }
                }
                for (i, o) in order.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write_value(&o.expr)?;
                    if o.order_type == OrderType::Descending {
                        self.write(" DESC");
                    }
                }
                self.write(")");
                Ok(())
            }
            Expr::Select(s) => {
                self.write("(");
                self.write_select(s, None)?;
                self.write(")");
                Ok(())
            }
            Expr::Projection(p) => self.write_subquery(&p.select),
            other => Err(self.unsupported(other.kind_name())),
        }
    }

    fn write_list(&mut self, items: &[ExprRef]) -> Result<()> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write_value(item)?;
        }
        Ok(())
    }

    fn write_literal(&mut self, lit: &Literal) -> Result<()> {
        match lit {
            Literal::Null => self.write("NULL"),
            Literal::Bool(b) => {
                let v = if *b { self.config.true_value } else { self.config.false_value };
                self.write(v);
            }
            Literal::Int(i) => self.write(&i.to_string()),
            Literal::Float(f) => {
                let v = f.into_inner();
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    self.write(&format!("{v:.1}"));
                } else {
                    self.write(&v.to_string());
                }
            }
            Literal::String(s) => {
                if self.config.unicode_strings {
                    self.write("N");
                }
                self.write(&format!("'{}'", s.replace('\'', "''")));
            }
            Literal::DateTime(dt) => {
                let d = self.config.date_delimiter;
                self.write(&format!("{d}{}{d}", dt.format("%Y-%m-%d %H:%M:%S")));
            }
            Literal::List(_) => return Err(self.unsupported("list constant outside IN")),
        }
        Ok(())
    }

    fn precedence(expr: &Expr) -> u8 {
        match expr {
            Expr::Binary(b) => match b.op {
                BinaryOp::Or => 1,
                BinaryOp::And => 2,
                op if op.is_comparison() => 4,
                BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Concat => 5,
                BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 6,
                _ => 9,
            },
            Expr::Unary(u) if u.op == UnaryOp::Not => 3,
            Expr::IsNull(_) | Expr::In(_) | Expr::Between(_) => 4,
            _ => 9,
        }
    }

    /// Write a child of an operator with precedence `parent`, adding
    /// parentheses when the child binds looser.
    fn write_operand(&mut self, child: &Expr, parent: u8, right: bool) -> Result<()> {
        let prec = Self::precedence(child);
        let associative = matches!(parent, 1 | 2);
        let wrap = prec < parent || (prec == parent && (right || parent == 4) && !associative);
        if wrap {
            self.write("(");
        }
        if parent <= 3 {
            self.write_predicate(child)?;
        } else {
            self.write_value(child)?;
        }
        if wrap {
            self.write(")");
        }
        Ok(())
    }

    fn write_binary(&mut self, b: &BinaryExpr) -> Result<()> {
        let is_null = |e: &Expr| matches!(e, Expr::Constant(Literal::Null));
        if matches!(b.op, BinaryOp::Equal | BinaryOp::NotEqual) && (is_null(&b.left) || is_null(&b.right)) {
            let operand = if is_null(&b.left) { &b.right } else { &b.left };
            self.write_operand(operand, 4, false)?;
            self.write(if b.op == BinaryOp::Equal { " IS NULL" } else { " IS NOT NULL" });
            return Ok(());
        }
        match b.op {
            BinaryOp::Coalesce => {
                if self.config.iif {
                    self.write("IIF(");
                    self.write_value(&b.left)?;
                    self.write(" IS NULL, ");
                    self.write_value(&b.right)?;
                    self.write(", ");
                    self.write_value(&b.left)?;
                    self.write(")");
                } else {
                    self.write("COALESCE(");
                    self.write_value(&b.left)?;
                    self.write(", ");
                    self.write_value(&b.right)?;
                    self.write(")");
                }
                return Ok(());
            }
            BinaryOp::Concat if self.config.concat == ConcatStyle::Function => {
                self.write("CONCAT(");
                self.write_value(&b.left)?;
                self.write(", ");
                self.write_value(&b.right)?;
                self.write(")");
                return Ok(());
            }
            BinaryOp::Modulo if self.config.mod_keyword => {
                let prec = Self::precedence(&Expr::Binary(b.clone()));
                self.write_operand(&b.left, prec, false)?;
                self.write(" MOD ");
                return self.write_operand(&b.right, prec, true);
            }
            _ => {}
        }
        let prec = match b.op {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            op if op.is_comparison() => 4,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Concat => 5,
            _ => 6,
        };
        let symbol = match (b.op, self.config.concat) {
            (BinaryOp::Concat, ConcatStyle::Pipes) => "||",
            (BinaryOp::Concat, ConcatStyle::Ampersand) => "&",
            (op, _) => op.symbol(),
        };
        self.write_operand(&b.left, prec, false)?;
        self.write(&format!(" {symbol} "));
        self.write_operand(&b.right, prec, true)
    }

    fn write_concat(&mut self, parts: &[&Expr]) -> Result<()> {
        match self.config.concat {
            ConcatStyle::Function => {
                self.write("CONCAT(");
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write_value(p)?;
                }
                self.write(")");
            }
            style => {
                let op = match style {
                    ConcatStyle::Plus => " + ",
                    ConcatStyle::Pipes => " || ",
                    _ => " & ",
                };
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        self.write(op);
                    }
                    self.write_operand(p, 5, i > 0)?;
                }
            }
        }
        Ok(())
    }

    fn write_call(&mut self, c: &CallExpr) -> Result<()> {
        let arg = |i: usize| -> Result<&ExprRef> {
            c.args
                .get(i)
                .ok_or_else(|| QueryError::internal(format!("{} is missing argument #{i}", c.method.name())))
        };
        let percent = Expr::Constant(Literal::String("%".into()));
        let names = self.config.functions;
        match c.method {
            Method::Contains | Method::StartsWith | Method::EndsWith => {
                self.write_operand(arg(0)?, 4, false)?;
                self.write(" LIKE ");
                let pattern: &Expr = arg(1)?;
                match c.method {
                    Method::Contains => self.write_concat(&[&percent, pattern, &percent])?,
                    Method::StartsWith => self.write_concat(&[pattern, &percent])?,
                    _ => self.write_concat(&[&percent, pattern])?,
                }
            }
            Method::Substring => {
                self.write(names.substring);
                self.write("(");
                self.write_value(arg(0)?)?;
                self.write(", ");
                match arg(1)?.as_ref() {
                    Expr::Constant(Literal::Int(start)) if *start < i64::MAX => self.write(&(start + 1).to_string()),
                    start => {
                        self.write_operand(start, 5, false)?;
                        self.write(" + 1");
                    }
                }
                self.write(", ");
                self.write_value(arg(2)?)?;
                self.write(")");
            }
            Method::Round => {
                self.write("ROUND(");
                self.write_value(arg(0)?)?;
                self.write(", 0)");
            }
            Method::Ceiling if names.ceiling.is_empty() => {
                self.write("-");
                self.write(names.floor);
                self.write("(-(");
                self.write_value(arg(0)?)?;
                self.write("))");
            }
            method => {
                let name = match method {
                    Method::ToUpper => names.upper,
                    Method::ToLower => names.lower,
                    Method::Trim => names.trim,
                    Method::Length => names.length,
                    Method::Abs => "ABS",
                    Method::Floor => names.floor,
                    _ => names.ceiling,
                };
                self.write(name);
                self.write("(");
                self.write_value(arg(0)?)?;
                self.write(")");
            }
        }
        Ok(())
    }

    fn write_aggregate(&mut self, a: &AggregateExpr) -> Result<()> {
        if a.distinct && !self.language.allows_distinct_in_aggregates() {
            return Err(self.unsupported("DISTINCT inside an aggregate"));
        }
        self.write(a.kind.sql_name());
        self.write("(");
        if a.distinct {
            self.write("DISTINCT ");
        }
        match &a.argument {
            Some(arg) => self.write_value(arg)?,
            None => self.write("*"),
        }
        self.write(")");
        Ok(())
    }

    // commands

    fn table_name(&self, table: &Expr) -> Result<String> {
        match table {
            Expr::Table(t) => Ok(self.language.quote(&t.name)),
            other => Err(QueryError::internal(format!("command target is {}", other.kind_name()))),
        }
    }

    fn column_name(&self, column: &Expr) -> Result<String> {
        match column {
            Expr::Column(c) => Ok(self.language.quote(&c.name)),
            other => Err(QueryError::internal(format!("assignment target is {}", other.kind_name()))),
        }
    }

    fn write_command(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Insert(i) => {
                self.hide_column_aliases = true;
                let table = self.table_name(&i.table)?;
                let columns = i
                    .assignments
                    .iter()
                    .map(|a| self.column_name(&a.column))
                    .collect::<Result<Vec<_>>>()?;
                self.write(&format!("INSERT INTO {table}({})", columns.join(", ")));
                self.newline();
                self.write("VALUES (");
                for (n, a) in i.assignments.iter().enumerate() {
                    if n > 0 {
                        self.write(", ");
                    }
                    self.write_value(&a.expr)?;
                }
                self.write(")");
                self.hide_column_aliases = false;
            }
            Expr::Update(u) => {
                self.hide_column_aliases = true;
                let table = self.table_name(&u.table)?;
                self.write(&format!("UPDATE {table}"));
                self.newline();
                self.write("SET ");
                for (n, a) in u.assignments.iter().enumerate() {
                    if n > 0 {
                        self.write(", ");
                    }
                    let column = self.column_name(&a.column)?;
                    self.write(&format!("{column} = "));
                    self.write_value(&a.expr)?;
                }
                self.newline();
                self.write("WHERE ");
                self.write_predicate(&u.where_)?;
                self.hide_column_aliases = false;
            }
            Expr::Delete(d) => {
                self.hide_column_aliases = true;
                let table = self.table_name(&d.table)?;
                self.write(&format!("DELETE FROM {table}"));
                if let Some(where_) = &d.where_ {
                    self.newline();
                    self.write("WHERE ");
                    self.write_predicate(where_)?;
                }
                self.hide_column_aliases = false;
            }
            Expr::Block(commands) => {
                if !self.language.allows_multiple_commands() {
                    return Err(self.unsupported("multiple commands in one batch"));
                }
                for (n, c) in commands.iter().enumerate() {
                    if n > 0 {
                        self.newline();
                    }
                    self.write_statement(c)?;
                }
            }
            Expr::If(i) => {
                if !self.language.allows_multiple_commands() {
                    return Err(self.unsupported("IF"));
                }
                self.write("IF ");
                self.write_predicate(&i.check)?;
                self.write_begin_end(&i.if_true)?;
                if let Some(if_false) = &i.if_false {
                    self.newline();
                    self.write("ELSE");
                    self.write_begin_end(if_false)?;
                }
            }
            Expr::Declaration(d) => {
                if !self.language.allows_multiple_commands() {
                    return Err(self.unsupported("DECLARE"));
                }
                for v in &d.variables {
                    let ty = self.language.type_system().format(&v.sql_type);
                    self.write(&format!("DECLARE {}{} {ty}", self.config.parameter_prefix, v.name));
                    self.newline();
                }
                self.write_select(d.source.as_select()?, Some(d))?;
            }
            Expr::Batch(b) => self.write_statement(&b.operation)?,
            other => return Err(self.unsupported(other.kind_name())),
        }
        Ok(())
    }

    fn write_statement(&mut self, expr: &ExprRef) -> Result<()> {
        match expr.as_ref() {
            Expr::Select(s) => self.write_select(s, None),
            Expr::Projection(p) => self.write_select(p.select()?, None),
            e if e.is_command() => self.write_command(e),
            other => Err(self.unsupported(other.kind_name())),
        }
    }

    fn write_begin_end(&mut self, body: &ExprRef) -> Result<()> {
        self.newline();
        self.write("BEGIN");
        self.depth += 1;
        self.newline();
        self.write_statement(body)?;
        self.depth -= 1;
        self.newline();
        self.write("END");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DialectKind;
    use crate::dialect::default_language;
    use crate::expr::{
        ColumnDeclaration, ColumnExpr, InExpr, NamedValueExpr, OrderExpr, SqlType, TableExpr,
    };

    fn table(name: &str) -> (TableAlias, ExprRef) {
        let alias = TableAlias::new();
        (alias, Arc::new(Expr::Table(TableExpr { alias, entity: name.into(), name: name.into() })))
    }

    fn col(alias: TableAlias, name: &str) -> ExprRef {
        Expr::column(alias, name, SqlType::int())
    }

    fn decl(alias: TableAlias, name: &str) -> ColumnDeclaration {
        ColumnDeclaration::new(name, col(alias, name), SqlType::int())
    }

    fn fmt(expr: &ExprRef, kind: DialectKind) -> Result<String> {
        SqlFormatter::format(expr, default_language(kind))
    }

    #[test]
    fn simple_select_per_dialect() {
        let (ta, t) = table("Customers");
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![decl(ta, "Id"), ColumnDeclaration::new("Label", col(ta, "Name"), SqlType::int())],
            Some(t),
            Some(Expr::equal(col(ta, "Id"), Expr::constant(3))),
        )
        .into_expr();
        assert_eq!(
            fmt(&select, DialectKind::TSql).unwrap(),
            "SELECT t0.[Id], t0.[Name] AS [Label]\nFROM [Customers] AS t0\nWHERE t0.[Id] = 3"
        );
        assert_eq!(
            fmt(&select, DialectKind::MySql).unwrap(),
            "SELECT t0.`Id`, t0.`Name` AS `Label`\nFROM `Customers` AS t0\nWHERE t0.`Id` = 3"
        );
        assert_eq!(
            fmt(&select, DialectKind::Oracle).unwrap(),
            "SELECT t0.Id, t0.Name AS Label\nFROM Customers t0\nWHERE t0.Id = 3"
        );
    }

    #[test]
    fn paging_styles() {
        let (ta, t) = table("Orders");
        let select = SelectExpr::new(TableAlias::new(), vec![decl(ta, "Id")], Some(t), None)
            .with_order_by(vec![OrderExpr::new(OrderType::Ascending, col(ta, "Id"))])
            .with_take(Some(Expr::constant(10)));
        let take_only = select.clone().into_expr();
        assert!(fmt(&take_only, DialectKind::TSql).unwrap().starts_with("SELECT TOP (10) t0.[Id]"));
        assert!(fmt(&take_only, DialectKind::Sqlite).unwrap().ends_with("ORDER BY t0.[Id]\nLIMIT 10"));
        assert!(fmt(&take_only, DialectKind::Oracle).unwrap().ends_with("FETCH FIRST 10 ROWS ONLY"));

        let paged = select.with_skip(Some(Expr::constant(5))).into_expr();
        assert!(fmt(&paged, DialectKind::MySql).unwrap().ends_with("LIMIT 5, 10"));
        assert!(fmt(&paged, DialectKind::Sqlite).unwrap().ends_with("LIMIT 10 OFFSET 5"));
        assert!(
            fmt(&paged, DialectKind::SqlServerCe)
                .unwrap()
                .ends_with("OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY")
        );
        let err = fmt(&paged, DialectKind::TSql).unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
    }

    #[test]
    fn access_parenthesizes_join_chains_and_uses_commas() {
        let (a, ta) = table("A");
        let (b, tb) = table("B");
        let (c, tc) = table("C");
        let ab = Expr::join(JoinKind::InnerJoin, ta, tb, Some(Expr::equal(col(a, "Id"), col(b, "AId"))));
        let abc = Expr::join(JoinKind::CrossJoin, ab, tc, None);
        let select = SelectExpr::new(TableAlias::new(), vec![decl(c, "Id")], Some(abc), None).into_expr();
        let sql = fmt(&select, DialectKind::Access).unwrap();
        assert!(sql.contains("FROM ([A] AS t1\nINNER JOIN [B] AS t2\n  ON t1.[Id] = t2.[AId]), [C] AS t0"), "{sql}");
        let sql = fmt(&select, DialectKind::TSql).unwrap();
        assert!(sql.contains("CROSS JOIN [C] AS t0"), "{sql}");
    }

    #[test]
    fn apply_is_rejected_where_unsupported() {
        let (_, ta) = table("A");
        let (b, tb) = table("B");
        let join = Expr::join(JoinKind::CrossApply, ta, tb, None);
        let select = SelectExpr::new(TableAlias::new(), vec![decl(b, "Id")], Some(join), None).into_expr();
        assert!(fmt(&select, DialectKind::TSql).unwrap().contains("CROSS APPLY [B]"));
        match fmt(&select, DialectKind::MySql).unwrap_err() {
            QueryError::Unsupported { dialect, .. } => assert_eq!(dialect.as_deref(), Some("MySql")),
            other => panic!("expected unsupported, got {other:?}"),
        }
    }

    #[test]
    fn predicates_in_value_position_become_case_or_iif() {
        let (ta, t) = table("P");
        let flag = Expr::binary(BinaryOp::GreaterThan, col(ta, "Stock"), Expr::constant(0));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("InStock", flag, SqlType::bit())],
            Some(t),
            None,
        )
        .into_expr();
        assert!(fmt(&select, DialectKind::TSql).unwrap().starts_with("SELECT CASE WHEN t0.[Stock] > 0 THEN 1 ELSE 0 END AS [InStock]"));
        assert!(fmt(&select, DialectKind::Access).unwrap().starts_with("SELECT IIF(t0.[Stock] > 0, TRUE, FALSE) AS [InStock]"));
    }

    #[test]
    fn null_comparisons_and_parentheses() {
        let (ta, t) = table("C");
        let pred = Expr::and(
            Expr::or(Expr::equal(col(ta, "A"), Expr::null()), Expr::equal(col(ta, "B"), Expr::constant(1))),
            Expr::not(Expr::is_null(col(ta, "C"))),
        );
        let select = SelectExpr::new(TableAlias::new(), vec![decl(ta, "A")], Some(t), Some(pred)).into_expr();
        let sql = fmt(&select, DialectKind::Sqlite).unwrap();
        assert!(sql.ends_with("WHERE (t0.[A] IS NULL OR t0.[B] = 1) AND t0.[C] IS NOT NULL"), "{sql}");
    }

    #[test]
    fn string_methods_and_parameters() {
        let (ta, t) = table("C");
        let name = Arc::new(Expr::NamedValue(NamedValueExpr {
            name: "p0".into(),
            sql_type: SqlType::nvarchar(10),
            value: Expr::constant("Lon"),
        }));
        let pred = Arc::new(Expr::Call(CallExpr { method: Method::StartsWith, args: vec![col(ta, "City"), name] }));
        let select = SelectExpr::new(TableAlias::new(), vec![decl(ta, "City")], Some(t), Some(pred)).into_expr();
        assert!(fmt(&select, DialectKind::TSql).unwrap().ends_with("WHERE t0.[City] LIKE @p0 + N'%'"));
        assert!(fmt(&select, DialectKind::MySql).unwrap().ends_with("WHERE t0.`City` LIKE CONCAT(?p0, '%')"));
        assert!(fmt(&select, DialectKind::Oracle).unwrap().ends_with("WHERE t0.City LIKE :p0 || '%'"));
    }

    #[test]
    fn empty_in_list_is_false() {
        let (ta, t) = table("C");
        let pred = Arc::new(Expr::In(InExpr { expr: col(ta, "Id"), select: None, values: vec![] }));
        let select = SelectExpr::new(TableAlias::new(), vec![decl(ta, "Id")], Some(t), Some(pred)).into_expr();
        assert!(fmt(&select, DialectKind::TSql).unwrap().ends_with("WHERE 0 <> 0"));
    }

    #[test]
    fn unbound_columns_are_rejected() {
        let free = Arc::new(Expr::Column(ColumnExpr { alias: None, name: "X".into(), sql_type: SqlType::int() }));
        let select = SelectExpr::new(TableAlias::new(), vec![ColumnDeclaration::new("X", free, SqlType::int())], None, None)
            .into_expr();
        assert!(matches!(fmt(&select, DialectKind::TSql).unwrap_err(), QueryError::UnboundColumn { .. }));
    }

    #[test]
    fn commands_hide_table_aliases() {
        let (ta, t) = table("Customers");
        let update = Arc::new(Expr::Update(crate::expr::UpdateCommand {
            table: t,
            where_: Expr::equal(col(ta, "Id"), Expr::constant(1)),
            assignments: vec![crate::expr::ColumnAssignment { column: col(ta, "Name"), expr: Expr::constant("x") }],
        }));
        assert_eq!(
            fmt(&update, DialectKind::TSql).unwrap(),
            "UPDATE [Customers]\nSET [Name] = N'x'\nWHERE [Id] = 1"
        );
    }

    #[test]
    fn select_without_from_uses_dummy_table() {
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![ColumnDeclaration::new("value", Expr::constant(1), SqlType::int())],
            None,
            None,
        )
        .into_expr();
        assert_eq!(fmt(&select, DialectKind::Oracle).unwrap(), "SELECT 1 AS value\nFROM DUAL");
        assert_eq!(fmt(&select, DialectKind::TSql).unwrap(), "SELECT 1 AS [value]");
    }

    #[test]
    fn substring_offsets_never_overflow() {
        let (ta, t) = table("C");
        let substring = |start: i64| {
            let call = Arc::new(Expr::Call(CallExpr {
                method: Method::Substring,
                args: vec![col(ta, "Name"), Expr::constant(start), Expr::constant(2i64)],
            }));
            SelectExpr::new(TableAlias::new(), vec![ColumnDeclaration::new("s", call, SqlType::nvarchar(2))], Some(t.clone()), None)
                .into_expr()
        };
        assert!(fmt(&substring(2), DialectKind::TSql).unwrap().contains("SUBSTRING(t0.[Name], 3, 2)"));
        assert!(fmt(&substring(i64::MAX), DialectKind::TSql).unwrap().contains("9223372036854775807 + 1"));
    }

    #[test]
    fn unordered_row_numbers_select_from_the_dummy_table() {
        let (ta, t) = table("C");
        let rn = Arc::new(Expr::RowNumber(vec![]));
        let select = SelectExpr::new(
            TableAlias::new(),
            vec![decl(ta, "Id"), ColumnDeclaration::new("rn", rn, SqlType::int())],
            Some(t),
            None,
        )
        .into_expr();
        assert!(fmt(&select, DialectKind::Oracle).unwrap().contains("ROW_NUMBER() OVER(ORDER BY (SELECT 1 FROM DUAL))"));
        assert!(fmt(&select, DialectKind::TSql).unwrap().contains("ROW_NUMBER() OVER(ORDER BY (SELECT 1))"));
    }
}
