use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::{DbType, Literal, SqlType};

/// Coarse kind of a value crossing the executor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    DateTime,
    Binary,
    Object,
    Array,
}

impl ValueKind {
    pub fn of_value(v: &Value) -> ValueKind {
        match v {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    ValueKind::Int
                } else {
                    ValueKind::Float
                }
            }
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn of_literal(lit: &Literal) -> ValueKind {
        match lit {
            Literal::Null => ValueKind::Null,
            Literal::Bool(_) => ValueKind::Bool,
            Literal::Int(_) => ValueKind::Int,
            Literal::Float(_) => ValueKind::Float,
            Literal::String(_) => ValueKind::String,
            Literal::DateTime(_) => ValueKind::DateTime,
            Literal::List(_) => ValueKind::Array,
        }
    }

    pub fn of_sql_type(ty: &SqlType) -> ValueKind {
        match &ty.db_type {
            DbType::BigInt | DbType::Int | DbType::SmallInt | DbType::TinyInt => ValueKind::Int,
            DbType::Bit => ValueKind::Bool,
            DbType::Decimal | DbType::Money | DbType::Float | DbType::Real => ValueKind::Float,
            DbType::Date | DbType::DateTime | DbType::Time => ValueKind::DateTime,
            DbType::Binary | DbType::VarBinary | DbType::Image => ValueKind::Binary,
            _ => ValueKind::String,
        }
    }

    /// The SQL type a value of this kind gets when nothing better is known.
    pub fn default_sql_type(&self) -> SqlType {
        match self {
            ValueKind::Bool => SqlType::bit(),
            ValueKind::Int => SqlType::int(),
            ValueKind::Float => SqlType::float(),
            ValueKind::DateTime => SqlType::date_time(),
            ValueKind::Binary => SqlType::new(DbType::VarBinary),
            _ => SqlType::new(DbType::NVarChar),
        }
    }

    /// Common kind for two inputs; Int and Float promote to Float, Null
    /// yields to anything.
    pub fn promote(a: ValueKind, b: ValueKind) -> ValueKind {
        use ValueKind::*;
        match (a, b) {
            (Null, x) | (x, Null) => x,
            (Int, Float) | (Float, Int) => Float,
            (x, y) if x == y => x,
            _ => String,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_json_numbers() {
        assert_eq!(ValueKind::of_value(&json!(1)), ValueKind::Int);
        assert_eq!(ValueKind::of_value(&json!(1.5)), ValueKind::Float);
        assert_eq!(ValueKind::of_value(&json!(null)), ValueKind::Null);
    }

    #[test]
    fn promotion_prefers_wider_numeric() {
        assert_eq!(ValueKind::promote(ValueKind::Int, ValueKind::Float), ValueKind::Float);
        assert_eq!(ValueKind::promote(ValueKind::Null, ValueKind::Bool), ValueKind::Bool);
        assert_eq!(ValueKind::promote(ValueKind::Bool, ValueKind::Int), ValueKind::String);
    }

    #[test]
    fn sql_types_map_to_kinds() {
        assert_eq!(ValueKind::of_sql_type(&SqlType::decimal(10, 2)), ValueKind::Float);
        assert_eq!(ValueKind::of_sql_type(&SqlType::bit()), ValueKind::Bool);
        assert_eq!(ValueKind::of_sql_type(&SqlType::new(DbType::Custom("XML".into()))), ValueKind::String);
    }
}
