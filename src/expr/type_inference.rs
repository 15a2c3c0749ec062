use crate::expr::{AggregateKind, BinaryOp, DbType, Expr, Method, SqlType, UnaryOp, ValueKind};

/// Best-effort SQL type of an expression, used when the binder or a pass
/// has to declare a new column or parameter.
pub struct TypeInference;

impl TypeInference {
    pub fn sql_type_of(expr: &Expr) -> SqlType {
        match expr {
            Expr::Constant(lit) => ValueKind::of_literal(lit).default_sql_type(),
            Expr::Column(c) => c.sql_type.clone(),
            Expr::NamedValue(nv) => nv.sql_type.clone(),
            Expr::Variable(v) => v.sql_type.clone(),
            Expr::Binary(b) => match b.op {
                op if op.is_predicate() => SqlType::bit(),
                BinaryOp::Concat => SqlType::new(DbType::NVarChar),
                BinaryOp::Coalesce => Self::sql_type_of(&b.left),
                _ => {
                    let l = Self::sql_type_of(&b.left);
                    let r = Self::sql_type_of(&b.right);
                    match ValueKind::promote(ValueKind::of_sql_type(&l), ValueKind::of_sql_type(&r)) {
                        ValueKind::Float => {
                            if ValueKind::of_sql_type(&l) == ValueKind::Float { l } else { r }
                        }
                        ValueKind::Int => l,
                        kind => kind.default_sql_type(),
                    }
                }
            },
            Expr::Unary(u) => match u.op {
                UnaryOp::Not => SqlType::bit(),
                UnaryOp::Negate => Self::sql_type_of(&u.operand),
            },
            Expr::Conditional(c) => Self::sql_type_of(&c.if_true),
            Expr::Call(call) => match call.method {
                Method::Contains | Method::StartsWith | Method::EndsWith => SqlType::bit(),
                Method::Length => SqlType::int(),
                _ => call
                    .args
                    .first()
                    .map(|a| Self::sql_type_of(a))
                    .unwrap_or_default(),
            },
            Expr::Aggregate(a) => match a.kind {
                AggregateKind::Count => SqlType::int(),
                AggregateKind::Average => SqlType::float(),
                _ => a
                    .argument
                    .as_ref()
                    .map(|arg| Self::sql_type_of(arg))
                    .unwrap_or_else(SqlType::int),
            },
            Expr::AggregateSubquery(a) => Self::sql_type_of(&a.aggregate_in_group_select),
            Expr::Scalar(select) => match select.as_ref() {
                Expr::Select(s) => s.columns.first().map(|c| c.sql_type.clone()).unwrap_or_default(),
                _ => SqlType::default(),
            },
            Expr::Exists(_) | Expr::In(_) | Expr::IsNull(_) | Expr::Between(_) => SqlType::bit(),
            Expr::RowNumber(_) => SqlType::int(),
            Expr::OuterJoined(o) => Self::sql_type_of(&o.expr),
            _ => SqlType::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::TableAlias;

    #[test]
    fn comparisons_are_bits() {
        let e = Expr::equal(Expr::constant(1), Expr::constant(2));
        assert_eq!(TypeInference::sql_type_of(&e).db_type, DbType::Bit);
    }

    #[test]
    fn arithmetic_keeps_decimal_operand_type() {
        let alias = TableAlias::new();
        let price = Expr::column(alias, "Price", SqlType::decimal(18, 2));
        let e = Expr::binary(BinaryOp::Multiply, Expr::constant(2), price);
        assert_eq!(TypeInference::sql_type_of(&e), SqlType::decimal(18, 2));
    }

    #[test]
    fn count_is_int_and_average_is_float() {
        let count = Expr::Aggregate(crate::expr::AggregateExpr { kind: AggregateKind::Count, argument: None, distinct: false });
        assert_eq!(TypeInference::sql_type_of(&count), SqlType::int());
        let avg = Expr::Aggregate(crate::expr::AggregateExpr {
            kind: AggregateKind::Average,
            argument: Some(Expr::constant(1)),
            distinct: false,
        });
        assert_eq!(TypeInference::sql_type_of(&avg), SqlType::float());
    }
}
