use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::expr::{available_column_name, ColumnDeclaration, ColumnExpr, Expr, ExprRef, TableAlias, TypeInference};
use crate::visitor::{ExprComparer, Rewriter, walk};

/// Result of pushing a projector down into a new select: the projector
/// rewritten in terms of the new select's columns, plus those columns.
#[derive(Debug, Clone)]
pub struct ProjectedColumns {
    pub projector: ExprRef,
    pub columns: Vec<ColumnDeclaration>,
}

/// Nodes that only the server can evaluate. Everything else in a projector
/// is computed on the client from the columns it reads.
pub fn must_be_column(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Column(_)
            | Expr::Scalar(_)
            | Expr::Exists(_)
            | Expr::In(_)
            | Expr::Aggregate(_)
            | Expr::AggregateSubquery(_)
            | Expr::RowNumber(_)
            | Expr::Function(_)
    )
}

/// Splits a projector into the parts that become columns of a new select
/// (`new_alias`) and the parts that stay on the client.
///
/// Columns reading from `existing_aliases` are re-declared on the new select
/// under a unique name; columns from any other alias are outer references
/// and are left alone. Computed server-only nodes become `c0`, `c1`, ...
pub struct ColumnProjector {
    candidates: HashSet<*const Expr>,
    existing_aliases: HashSet<TableAlias>,
    new_alias: TableAlias,
    columns: Vec<ColumnDeclaration>,
    map: HashMap<ColumnExpr, ExprRef>,
    existing_count: usize,
    next_column: usize,
}

impl ColumnProjector {
    pub fn project(expr: &ExprRef, new_alias: TableAlias, existing_aliases: &[TableAlias]) -> Result<ProjectedColumns> {
        Self::project_onto(expr, &[], new_alias, existing_aliases)
    }

    /// Like `project`, starting from `existing_columns`; equal expressions
    /// reuse an existing declaration instead of adding a new one.
    pub fn project_onto(
        expr: &ExprRef,
        existing_columns: &[ColumnDeclaration],
        new_alias: TableAlias,
        existing_aliases: &[TableAlias],
    ) -> Result<ProjectedColumns> {
        let mut candidates = HashSet::new();
        Nominator::nominate(expr, &mut candidates);
        let mut projector = ColumnProjector {
            candidates,
            existing_aliases: existing_aliases.iter().copied().collect(),
            new_alias,
            columns: existing_columns.to_vec(),
            map: HashMap::new(),
            existing_count: existing_columns.len(),
            next_column: 0,
        };
        let out = projector.visit(expr)?;
        Ok(ProjectedColumns { projector: out, columns: projector.columns })
    }

    fn reuse(&self, expr: &Expr) -> Option<ExprRef> {
        self.columns[..self.existing_count]
            .iter()
            .find(|c| ExprComparer::are_equal(&c.expr, expr))
            .map(|c| Expr::column(self.new_alias, c.name.clone(), c.sql_type.clone()))
    }

    fn declare(&mut self, base: &str, expr: &ExprRef) -> ExprRef {
        let name = available_column_name(&self.columns, base);
        let sql_type = TypeInference::sql_type_of(expr);
        self.columns.push(ColumnDeclaration::new(name.clone(), expr.clone(), sql_type.clone()));
        Expr::column(self.new_alias, name, sql_type)
    }

    fn next_name(&mut self) -> String {
        loop {
            let name = format!("c{}", self.next_column);
            self.next_column += 1;
            if !self.columns.iter().any(|c| c.name == name) {
                return name;
            }
        }
    }
}

impl Rewriter for ColumnProjector {
    fn visit(&mut self, expr: &ExprRef) -> Result<ExprRef> {
        if !self.candidates.contains(&std::sync::Arc::as_ptr(expr)) {
            return walk(self, expr);
        }
        if let Some(reused) = self.reuse(expr) {
            return Ok(reused);
        }
        match expr.as_ref() {
            Expr::Column(c) => {
                if let Some(mapped) = self.map.get(c) {
                    return Ok(mapped.clone());
                }
                match c.alias {
                    Some(alias) if self.existing_aliases.contains(&alias) => {
                        let mapped = self.declare(&c.name, expr);
                        self.map.insert(c.clone(), mapped.clone());
                        Ok(mapped)
                    }
                    _ => Ok(expr.clone()),
                }
            }
            _ => {
                let name = self.next_name();
                Ok(self.declare(&name, expr))
            }
        }
    }
}

/// Marks the maximal subtrees that must be evaluated by the server.
struct Nominator;

impl Nominator {
    fn nominate(expr: &ExprRef, candidates: &mut HashSet<*const Expr>) {
        match expr.as_ref() {
            // inside a nested query only outer column references matter
            Expr::Select(_) | Expr::Projection(_) | Expr::ClientJoin(_) => {
                for child in expr.children() {
                    Self::nominate_columns_only(child, candidates);
                }
            }
            e if must_be_column(e) => {
                candidates.insert(std::sync::Arc::as_ptr(expr));
            }
            _ => {
                for child in expr.children() {
                    Self::nominate(child, candidates);
                }
            }
        }
    }

    fn nominate_columns_only(expr: &ExprRef, candidates: &mut HashSet<*const Expr>) {
        if let Expr::Column(_) = expr.as_ref() {
            candidates.insert(std::sync::Arc::as_ptr(expr));
        }
        for child in expr.children() {
            Self::nominate_columns_only(child, candidates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::expr::{AggregateExpr, AggregateKind, BinaryOp, SqlType};

    #[test]
    fn columns_of_existing_aliases_are_redeclared() {
        let inner = TableAlias::new();
        let outer_ref = TableAlias::new();
        let new_alias = TableAlias::new();
        let projector = Expr::record(vec![
            ("Id".into(), Expr::column(inner, "Id", SqlType::int())),
            ("Name".into(), Expr::column(inner, "Name", SqlType::nvarchar(40))),
            ("Parent".into(), Expr::column(outer_ref, "Id", SqlType::int())),
        ]);
        let pc = ColumnProjector::project(&projector, new_alias, &[inner]).unwrap();
        let names: Vec<_> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Name"]);
        match pc.projector.as_ref() {
            Expr::Record(r) => {
                assert_eq!(r.field("Id").and_then(|e| e.as_column()).and_then(|c| c.alias), Some(new_alias));
                assert_eq!(r.field("Parent").and_then(|e| e.as_column()).and_then(|c| c.alias), Some(outer_ref));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn client_computations_stay_in_projector() {
        let inner = TableAlias::new();
        let sum = Expr::binary(BinaryOp::Add, Expr::column(inner, "A", SqlType::int()), Expr::column(inner, "A", SqlType::int()));
        let pc = ColumnProjector::project(&sum, TableAlias::new(), &[inner]).unwrap();
        assert_eq!(pc.columns.len(), 1);
        assert!(matches!(pc.projector.as_ref(), Expr::Binary(_)));
    }

    #[test]
    fn aggregates_get_generated_names() {
        let inner = TableAlias::new();
        let agg = Arc::new(Expr::Aggregate(AggregateExpr {
            kind: AggregateKind::Max,
            argument: Some(Expr::column(inner, "Freight", SqlType::float())),
            distinct: false,
        }));
        let pc = ColumnProjector::project(&agg, TableAlias::new(), &[inner]).unwrap();
        assert_eq!(pc.columns.len(), 1);
        assert_eq!(pc.columns[0].name, "c0");
        assert!(matches!(pc.columns[0].expr.as_ref(), Expr::Aggregate(_)));
    }

    #[test]
    fn duplicate_names_are_made_unique() {
        let (a, b) = (TableAlias::new(), TableAlias::new());
        let projector = Expr::record(vec![
            ("X".into(), Expr::column(a, "Id", SqlType::int())),
            ("Y".into(), Expr::column(b, "Id", SqlType::int())),
        ]);
        let pc = ColumnProjector::project(&projector, TableAlias::new(), &[a, b]).unwrap();
        let names: Vec<_> = pc.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Id1"]);
    }
}
