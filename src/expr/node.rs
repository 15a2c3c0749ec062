use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::expr::{Literal, SelectExpr, SqlType, TableAlias};
use crate::query::{Parameter, QueryOp};

pub type ExprRef = Arc<Expr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_predicate(&self) -> bool {
        self.is_comparison() || self.is_logical()
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "+",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "<>",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Coalesce => "??",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// String and math helpers callable from lambda bodies. The receiver is
/// always the first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Contains,
    StartsWith,
    EndsWith,
    ToUpper,
    ToLower,
    Trim,
    Length,
    Substring,
    Abs,
    Round,
    Floor,
    Ceiling,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Contains => "Contains",
            Method::StartsWith => "StartsWith",
            Method::EndsWith => "EndsWith",
            Method::ToUpper => "ToUpper",
            Method::ToLower => "ToLower",
            Method::Trim => "Trim",
            Method::Length => "Length",
            Method::Substring => "Substring",
            Method::Abs => "Abs",
            Method::Round => "Round",
            Method::Floor => "Floor",
            Method::Ceiling => "Ceiling",
        }
    }

    pub fn is_predicate(&self) -> bool {
        matches!(self, Method::Contains | Method::StartsWith | Method::EndsWith)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    CrossJoin,
    InnerJoin,
    CrossApply,
    OuterApply,
    LeftOuter,
    SingletonLeftOuter,
}

impl JoinKind {
    pub fn is_apply(&self) -> bool {
        matches!(self, JoinKind::CrossApply | JoinKind::OuterApply)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Ascending,
    Descending,
}

impl OrderType {
    pub fn reversed(self) -> Self {
        match self {
            OrderType::Ascending => OrderType::Descending,
            OrderType::Descending => OrderType::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl AggregateKind {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Average => "AVG",
        }
    }
}

/// How a row sequence collapses into the result the caller asked for. A
/// projection without one of these yields a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::First => "First",
            ElementKind::FirstOrDefault => "FirstOrDefault",
            ElementKind::Single => "Single",
            ElementKind::SingleOrDefault => "SingleOrDefault",
            ElementKind::Last => "Last",
            ElementKind::LastOrDefault => "LastOrDefault",
        }
    }

    pub fn or_default(&self) -> bool {
        matches!(
            self,
            ElementKind::FirstOrDefault | ElementKind::SingleOrDefault | ElementKind::LastOrDefault
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrderExpr {
    pub order_type: OrderType,
    pub expr: ExprRef,
}

impl OrderExpr {
    pub fn new(order_type: OrderType, expr: ExprRef) -> Self {
        Self { order_type, expr }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDeclaration {
    pub name: String,
    pub expr: ExprRef,
    pub sql_type: SqlType,
}

impl ColumnDeclaration {
    pub fn new(name: impl Into<String>, expr: ExprRef, sql_type: SqlType) -> Self {
        Self { name: name.into(), expr, sql_type }
    }
}

#[derive(Debug, Clone)]
pub struct TableExpr {
    pub alias: TableAlias,
    pub entity: String,
    pub name: String,
}

/// Columns compare by alias and name only; the declared type does not take
/// part in identity.
#[derive(Debug, Clone)]
pub struct ColumnExpr {
    pub alias: Option<TableAlias>,
    pub name: String,
    pub sql_type: SqlType,
}

impl PartialEq for ColumnExpr {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.name == other.name
    }
}

impl Eq for ColumnExpr {}

impl std::hash::Hash for ColumnExpr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.alias.hash(state);
        self.name.hash(state);
    }
}

#[derive(Debug, Clone)]
pub struct JoinExpr {
    pub kind: JoinKind,
    pub left: ExprRef,
    pub right: ExprRef,
    pub condition: Option<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct ProjectionExpr {
    pub select: ExprRef,
    pub projector: ExprRef,
    pub aggregator: Option<ElementKind>,
}

impl ProjectionExpr {
    pub fn is_singleton(&self) -> bool {
        self.aggregator.is_some()
    }

    pub fn select(&self) -> Result<&SelectExpr> {
        self.select.as_select()
    }
}

#[derive(Debug, Clone)]
pub struct EntityExpr {
    pub entity: String,
    pub expr: ExprRef,
}

#[derive(Debug, Clone)]
pub struct OuterJoinedExpr {
    pub test: ExprRef,
    pub expr: ExprRef,
}

#[derive(Debug, Clone)]
pub struct ClientJoinExpr {
    pub projection: ExprRef,
    pub outer_key: Vec<ExprRef>,
    pub inner_key: Vec<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct GroupingExpr {
    pub key: ExprRef,
    pub elements: ExprRef,
}

#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub kind: AggregateKind,
    pub argument: Option<ExprRef>,
    pub distinct: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateSubqueryExpr {
    pub group_by_alias: TableAlias,
    pub aggregate_in_group_select: ExprRef,
    pub subquery: ExprRef,
}

#[derive(Debug, Clone)]
pub struct InExpr {
    pub expr: ExprRef,
    pub select: Option<ExprRef>,
    pub values: Vec<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct BetweenExpr {
    pub expr: ExprRef,
    pub lower: ExprRef,
    pub upper: ExprRef,
}

#[derive(Debug, Clone)]
pub struct NamedValueExpr {
    pub name: String,
    pub sql_type: SqlType,
    pub value: ExprRef,
}

/// A database function call. `args: None` renders the bare name, as in
/// `@@IDENTITY`.
#[derive(Debug, Clone)]
pub struct FunctionExpr {
    pub name: String,
    pub args: Option<Vec<ExprRef>>,
}

#[derive(Debug, Clone)]
pub struct MemberExpr {
    pub object: ExprRef,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: ExprRef,
    pub right: ExprRef,
}

#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: ExprRef,
}

#[derive(Debug, Clone)]
pub struct ConditionalExpr {
    pub test: ExprRef,
    pub if_true: ExprRef,
    pub if_false: ExprRef,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub method: Method,
    pub args: Vec<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct RecordExpr {
    pub fields: Vec<(String, ExprRef)>,
}

impl RecordExpr {
    pub fn field(&self, name: &str) -> Option<&ExprRef> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnAssignment {
    pub column: ExprRef,
    pub expr: ExprRef,
}

#[derive(Debug, Clone)]
pub struct InsertCommand {
    pub table: ExprRef,
    pub assignments: Vec<ColumnAssignment>,
}

#[derive(Debug, Clone)]
pub struct UpdateCommand {
    pub table: ExprRef,
    pub where_: ExprRef,
    pub assignments: Vec<ColumnAssignment>,
}

#[derive(Debug, Clone)]
pub struct DeleteCommand {
    pub table: ExprRef,
    pub where_: Option<ExprRef>,
}

/// One command template applied to many items. The template refers to the
/// current item through `item`.
#[derive(Debug, Clone)]
pub struct BatchCommand {
    pub item: Parameter,
    pub operation: ExprRef,
    pub items: Arc<Vec<Value>>,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct IfCommand {
    pub check: ExprRef,
    pub if_true: ExprRef,
    pub if_false: Option<ExprRef>,
}

#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub name: String,
    pub sql_type: SqlType,
    pub expr: ExprRef,
}

#[derive(Debug, Clone)]
pub struct DeclarationCommand {
    pub variables: Vec<VariableDeclaration>,
    pub source: ExprRef,
}

#[derive(Debug, Clone)]
pub struct VariableExpr {
    pub name: String,
    pub sql_type: SqlType,
}

/// The closed set of node kinds. Language nodes come from lambda bodies,
/// relational nodes are produced by the binder and the rewrite passes, and
/// command nodes describe writes and multi-statement scripts.
#[derive(Debug, Clone)]
pub enum Expr {
    // language
    Constant(Literal),
    Parameter(Parameter),
    Member(MemberExpr),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Conditional(ConditionalExpr),
    Call(CallExpr),
    Record(RecordExpr),
    Query(QueryOp),
    Grouping(GroupingExpr),

    // relational
    Table(TableExpr),
    Column(ColumnExpr),
    Select(SelectExpr),
    Join(JoinExpr),
    Projection(ProjectionExpr),
    Entity(EntityExpr),
    OuterJoined(OuterJoinedExpr),
    ClientJoin(ClientJoinExpr),
    Aggregate(AggregateExpr),
    AggregateSubquery(AggregateSubqueryExpr),
    Scalar(ExprRef),
    Exists(ExprRef),
    In(InExpr),
    IsNull(ExprRef),
    Between(BetweenExpr),
    RowNumber(Vec<OrderExpr>),
    NamedValue(NamedValueExpr),
    Function(FunctionExpr),

    // commands
    Insert(InsertCommand),
    Update(UpdateCommand),
    Delete(DeleteCommand),
    Batch(BatchCommand),
    Block(Vec<ExprRef>),
    If(IfCommand),
    Declaration(DeclarationCommand),
    Variable(VariableExpr),
}

impl Expr {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "Constant",
            Expr::Parameter(_) => "Parameter",
            Expr::Member(_) => "Member",
            Expr::Binary(_) => "Binary",
            Expr::Unary(_) => "Unary",
            Expr::Conditional(_) => "Conditional",
            Expr::Call(_) => "Call",
            Expr::Record(_) => "Record",
            Expr::Query(_) => "Query",
            Expr::Grouping(_) => "Grouping",
            Expr::Table(_) => "Table",
            Expr::Column(_) => "Column",
            Expr::Select(_) => "Select",
            Expr::Join(_) => "Join",
            Expr::Projection(_) => "Projection",
            Expr::Entity(_) => "Entity",
            Expr::OuterJoined(_) => "OuterJoined",
            Expr::ClientJoin(_) => "ClientJoin",
            Expr::Aggregate(_) => "Aggregate",
            Expr::AggregateSubquery(_) => "AggregateSubquery",
            Expr::Scalar(_) => "Scalar",
            Expr::Exists(_) => "Exists",
            Expr::In(_) => "In",
            Expr::IsNull(_) => "IsNull",
            Expr::Between(_) => "Between",
            Expr::RowNumber(_) => "RowNumber",
            Expr::NamedValue(_) => "NamedValue",
            Expr::Function(_) => "Function",
            Expr::Insert(_) => "Insert",
            Expr::Update(_) => "Update",
            Expr::Delete(_) => "Delete",
            Expr::Batch(_) => "Batch",
            Expr::Block(_) => "Block",
            Expr::If(_) => "If",
            Expr::Declaration(_) => "Declaration",
            Expr::Variable(_) => "Variable",
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Expr::Insert(_)
                | Expr::Update(_)
                | Expr::Delete(_)
                | Expr::Batch(_)
                | Expr::Block(_)
                | Expr::If(_)
                | Expr::Declaration(_)
        )
    }

    pub fn as_select(&self) -> Result<&SelectExpr> {
        match self {
            Expr::Select(s) => Ok(s),
            other => Err(QueryError::internal(format!("expected Select, found {}", other.kind_name()))),
        }
    }

    pub fn as_projection(&self) -> Result<&ProjectionExpr> {
        match self {
            Expr::Projection(p) => Ok(p),
            other => Err(QueryError::internal(format!("expected Projection, found {}", other.kind_name()))),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnExpr> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    /// Alias declared by a row source (`Select` or `Table`).
    pub fn declared_alias(&self) -> Option<TableAlias> {
        match self {
            Expr::Select(s) => Some(s.alias),
            Expr::Table(t) => Some(t.alias),
            _ => None,
        }
    }

    /// Direct children in visiting order.
    pub fn children(&self) -> Vec<&ExprRef> {
        let mut out: Vec<&ExprRef> = Vec::new();
        match self {
            Expr::Constant(_)
            | Expr::Parameter(_)
            | Expr::Table(_)
            | Expr::Column(_)
            | Expr::Variable(_) => {}
            Expr::Member(m) => out.push(&m.object),
            Expr::Binary(b) => {
                out.push(&b.left);
                out.push(&b.right);
            }
            Expr::Unary(u) => out.push(&u.operand),
            Expr::Conditional(c) => {
                out.push(&c.test);
                out.push(&c.if_true);
                out.push(&c.if_false);
            }
            Expr::Call(c) => out.extend(c.args.iter()),
            Expr::Record(r) => out.extend(r.fields.iter().map(|(_, e)| e)),
            Expr::Query(q) => out.extend(q.children()),
            Expr::Grouping(g) => {
                out.push(&g.key);
                out.push(&g.elements);
            }
            Expr::Select(s) => {
                out.extend(s.from.iter());
                out.extend(s.where_.iter());
                out.extend(s.columns.iter().map(|c| &c.expr));
                out.extend(s.order_by.iter().map(|o| &o.expr));
                out.extend(s.group_by.iter());
                out.extend(s.skip.iter());
                out.extend(s.take.iter());
            }
            Expr::Join(j) => {
                out.push(&j.left);
                out.push(&j.right);
                out.extend(j.condition.iter());
            }
            Expr::Projection(p) => {
                out.push(&p.select);
                out.push(&p.projector);
            }
            Expr::Entity(e) => out.push(&e.expr),
            Expr::OuterJoined(o) => {
                out.push(&o.test);
                out.push(&o.expr);
            }
            Expr::ClientJoin(c) => {
                out.extend(c.outer_key.iter());
                out.extend(c.inner_key.iter());
                out.push(&c.projection);
            }
            Expr::Aggregate(a) => out.extend(a.argument.iter()),
            Expr::AggregateSubquery(a) => out.push(&a.subquery),
            Expr::Scalar(s) | Expr::Exists(s) | Expr::IsNull(s) => out.push(s),
            Expr::In(i) => {
                out.push(&i.expr);
                out.extend(i.select.iter());
                out.extend(i.values.iter());
            }
            Expr::Between(b) => {
                out.push(&b.expr);
                out.push(&b.lower);
                out.push(&b.upper);
            }
            Expr::RowNumber(order) => out.extend(order.iter().map(|o| &o.expr)),
            Expr::NamedValue(nv) => out.push(&nv.value),
            Expr::Function(f) => {
                if let Some(args) = &f.args {
                    out.extend(args.iter());
                }
            }
            Expr::Insert(i) => {
                out.push(&i.table);
                for a in &i.assignments {
                    out.push(&a.column);
                    out.push(&a.expr);
                }
            }
            Expr::Update(u) => {
                out.push(&u.table);
                out.push(&u.where_);
                for a in &u.assignments {
                    out.push(&a.column);
                    out.push(&a.expr);
                }
            }
            Expr::Delete(d) => {
                out.push(&d.table);
                out.extend(d.where_.iter());
            }
            Expr::Batch(b) => out.push(&b.operation),
            Expr::Block(commands) => out.extend(commands.iter()),
            Expr::If(i) => {
                out.push(&i.check);
                out.push(&i.if_true);
                out.extend(i.if_false.iter());
            }
            Expr::Declaration(d) => {
                out.extend(d.variables.iter().map(|v| &v.expr));
                out.push(&d.source);
            }
        }
        out
    }

    // constructors

    pub fn constant(value: impl Into<Literal>) -> ExprRef {
        Arc::new(Expr::Constant(value.into()))
    }

    pub fn null() -> ExprRef {
        Arc::new(Expr::Constant(Literal::Null))
    }

    pub fn column(alias: TableAlias, name: impl Into<String>, sql_type: SqlType) -> ExprRef {
        Arc::new(Expr::Column(ColumnExpr { alias: Some(alias), name: name.into(), sql_type }))
    }

    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Arc::new(Expr::Binary(BinaryExpr { op, left, right }))
    }

    pub fn equal(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Or, left, right)
    }

    pub fn not(operand: ExprRef) -> ExprRef {
        Arc::new(Expr::Unary(UnaryExpr { op: UnaryOp::Not, operand }))
    }

    pub fn is_null(operand: ExprRef) -> ExprRef {
        Arc::new(Expr::IsNull(operand))
    }

    pub fn member(object: ExprRef, name: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Member(MemberExpr { object, name: name.into() }))
    }

    pub fn function(name: impl Into<String>, args: Vec<ExprRef>) -> ExprRef {
        Arc::new(Expr::Function(FunctionExpr { name: name.into(), args: Some(args) }))
    }

    pub fn bare_function(name: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Function(FunctionExpr { name: name.into(), args: None }))
    }

    pub fn record(fields: Vec<(String, ExprRef)>) -> ExprRef {
        Arc::new(Expr::Record(RecordExpr { fields }))
    }

    pub fn projection(select: SelectExpr, projector: ExprRef, aggregator: Option<ElementKind>) -> ExprRef {
        Arc::new(Expr::Projection(ProjectionExpr { select: Arc::new(Expr::Select(select)), projector, aggregator }))
    }

    pub fn join(kind: JoinKind, left: ExprRef, right: ExprRef, condition: Option<ExprRef>) -> ExprRef {
        Arc::new(Expr::Join(JoinExpr { kind, left, right, condition }))
    }

    /// Fold a list of predicates with AND; `None` when the list is empty.
    pub fn and_all(predicates: impl IntoIterator<Item = ExprRef>) -> Option<ExprRef> {
        predicates.into_iter().reduce(Expr::and)
    }

    /// Split a predicate on its top-level ANDs.
    pub fn split_and(expr: &ExprRef) -> Vec<ExprRef> {
        match expr.as_ref() {
            Expr::Binary(b) if b.op == BinaryOp::And => {
                let mut parts = Self::split_and(&b.left);
                parts.extend(Self::split_and(&b.right));
                parts
            }
            _ => vec![expr.clone()],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// Pointer identity of two nodes.
pub fn same(a: &ExprRef, b: &ExprRef) -> bool {
    Arc::ptr_eq(a, b)
}

pub fn same_opt(a: &Option<ExprRef>, b: &Option<ExprRef>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

pub fn same_list(a: &[ExprRef], b: &[ExprRef]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_compare_by_alias_and_name() {
        let alias = TableAlias::new();
        let a = ColumnExpr { alias: Some(alias), name: "Id".into(), sql_type: SqlType::int() };
        let b = ColumnExpr { alias: Some(alias), name: "Id".into(), sql_type: SqlType::nvarchar(5) };
        let c = ColumnExpr { alias: Some(TableAlias::new()), name: "Id".into(), sql_type: SqlType::int() };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn split_and_flattens_nested_conjunctions() {
        let alias = TableAlias::new();
        let x = Expr::equal(Expr::column(alias, "A", SqlType::int()), Expr::constant(1));
        let y = Expr::equal(Expr::column(alias, "B", SqlType::int()), Expr::constant(2));
        let z = Expr::is_null(Expr::column(alias, "C", SqlType::int()));
        let pred = Expr::and(Expr::and(x.clone(), y.clone()), z.clone());
        let parts = Expr::split_and(&pred);
        assert_eq!(parts.len(), 3);
        assert!(same(&parts[0], &x) && same(&parts[1], &y) && same(&parts[2], &z));
    }

    #[test]
    fn and_all_of_nothing_is_none() {
        assert!(Expr::and_all(Vec::new()).is_none());
    }

    #[test]
    fn as_select_reports_actual_kind() {
        let err = Expr::constant(1).as_select().unwrap_err();
        assert!(err.to_string().contains("Constant"));
    }
}
