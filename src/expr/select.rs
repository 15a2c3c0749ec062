use std::sync::Arc;

use crate::expr::{ColumnDeclaration, Expr, ExprRef, OrderExpr, TableAlias};

/// The central relational node. Every `with_*` helper returns a new value
/// that shares all untouched parts with `self`.
#[derive(Debug, Clone)]
pub struct SelectExpr {
    pub alias: TableAlias,
    pub columns: Vec<ColumnDeclaration>,
    pub from: Option<ExprRef>,
    pub where_: Option<ExprRef>,
    pub order_by: Vec<OrderExpr>,
    pub group_by: Vec<ExprRef>,
    pub distinct: bool,
    pub reverse: bool,
    pub skip: Option<ExprRef>,
    pub take: Option<ExprRef>,
}

impl SelectExpr {
    pub fn new(
        alias: TableAlias,
        columns: Vec<ColumnDeclaration>,
        from: Option<ExprRef>,
        where_: Option<ExprRef>,
    ) -> Self {
        Self {
            alias,
            columns,
            from,
            where_,
            order_by: Vec::new(),
            group_by: Vec::new(),
            distinct: false,
            reverse: false,
            skip: None,
            take: None,
        }
    }

    pub fn into_expr(self) -> ExprRef {
        Arc::new(Expr::Select(self))
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDeclaration> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn with_columns(&self, columns: Vec<ColumnDeclaration>) -> Self {
        Self { columns, ..self.clone() }
    }

    pub fn with_from(&self, from: Option<ExprRef>) -> Self {
        Self { from, ..self.clone() }
    }

    pub fn with_where(&self, where_: Option<ExprRef>) -> Self {
        Self { where_, ..self.clone() }
    }

    pub fn with_order_by(&self, order_by: Vec<OrderExpr>) -> Self {
        Self { order_by, ..self.clone() }
    }

    pub fn with_group_by(&self, group_by: Vec<ExprRef>) -> Self {
        Self { group_by, ..self.clone() }
    }

    pub fn with_distinct(&self, distinct: bool) -> Self {
        Self { distinct, ..self.clone() }
    }

    pub fn with_reverse(&self, reverse: bool) -> Self {
        Self { reverse, ..self.clone() }
    }

    pub fn with_skip(&self, skip: Option<ExprRef>) -> Self {
        Self { skip, ..self.clone() }
    }

    pub fn with_take(&self, take: Option<ExprRef>) -> Self {
        Self { take, ..self.clone() }
    }

    pub fn add_column(&self, column: ColumnDeclaration) -> Self {
        let mut columns = self.columns.clone();
        columns.push(column);
        self.with_columns(columns)
    }

    pub fn remove_column(&self, name: &str) -> Self {
        let columns = self.columns.iter().filter(|c| c.name != name).cloned().collect();
        self.with_columns(columns)
    }

    /// Push this select down one level under `new_alias`. The outer layer
    /// keeps the original alias and re-exposes every column by name.
    pub fn add_redundant_select(&self, new_alias: TableAlias) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|d| ColumnDeclaration::new(d.name.clone(), Expr::column(new_alias, d.name.clone(), d.sql_type.clone()), d.sql_type.clone()))
            .collect();
        let inner = Self { alias: new_alias, ..self.clone() };
        SelectExpr::new(self.alias, columns, Some(inner.into_expr()), None)
    }
}

/// First name based on `base` that no declaration in `columns` uses yet.
pub fn available_column_name(columns: &[ColumnDeclaration], base: &str) -> String {
    let taken = |name: &str| columns.iter().any(|c| c.name == name);
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
