use std::fmt::{self, Display};

use chrono::NaiveDateTime;
use ordered_float::NotNan;
use serde_json::{Number, Value};

/// Constant values that can appear in a query tree.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(NotNan<f64>),
    String(String),
    DateTime(NaiveDateTime),
    List(Vec<Literal>),
}

const DATE_TIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Literal::Int(_) | Literal::Float(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Literal::Int(i) => Some(*i),
            Literal::Float(f) if f.fract() == 0.0 => Some(f.into_inner() as i64),
            _ => None,
        }
    }

    pub fn float(f: f64) -> Literal {
        NotNan::new(f).map(Literal::Float).unwrap_or(Literal::Null)
    }

    /// Convert a JSON value into a literal. Objects have no literal form and
    /// come back as `None`.
    pub fn from_json(value: &Value) -> Option<Literal> {
        match value {
            Value::Null => Some(Literal::Null),
            Value::Bool(b) => Some(Literal::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Literal::Int(i)),
                None => n.as_f64().map(Literal::float),
            },
            Value::String(s) => Some(Literal::String(s.clone())),
            Value::Array(items) => items.iter().map(Literal::from_json).collect::<Option<Vec<_>>>().map(Literal::List),
            Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Number(Number::from(*i)),
            Literal::Float(f) => Number::from_f64(f.into_inner()).map(Value::Number).unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
            Literal::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Literal::List(items) => Value::Array(items.iter().map(Literal::to_json).collect()),
        }
    }

    pub fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
        DATE_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Int(value)
    }
}

impl From<i32> for Literal {
    fn from(value: i32) -> Self {
        Literal::Int(value as i64)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::float(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Bool(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<NaiveDateTime> for Literal {
    fn from(value: NaiveDateTime) -> Self {
        Literal::DateTime(value)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(n) => write!(f, "{}", n.into_inner()),
            Literal::String(s) => write!(f, "\"{s}\""),
            Literal::DateTime(dt) => write!(f, "#{}#", dt.format("%Y-%m-%dT%H:%M:%S")),
            Literal::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Debug for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "Null"),
            Literal::Bool(_) => write!(f, "Bool({self})"),
            Literal::Int(_) => write!(f, "Int({self})"),
            Literal::Float(_) => write!(f, "Float({self})"),
            Literal::String(_) => write!(f, "String({self})"),
            Literal::DateTime(_) => write!(f, "DateTime({self})"),
            Literal::List(_) => write!(f, "List({self})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_kind() {
        assert_eq!(Literal::from_json(&json!(42)), Some(Literal::Int(42)));
        assert_eq!(Literal::from_json(&json!(2.5)), Some(Literal::float(2.5)));
    }

    #[test]
    fn objects_have_no_literal_form() {
        assert_eq!(Literal::from_json(&json!({"a": 1})), None);
        assert_eq!(Literal::from_json(&json!([1, {"a": 1}])), None);
    }

    #[test]
    fn lists_convert_element_wise() {
        let lit = Literal::from_json(&json!(["a", null, true])).unwrap();
        assert_eq!(
            lit,
            Literal::List(vec![Literal::String("a".into()), Literal::Null, Literal::Bool(true)])
        );
        assert_eq!(lit.to_json(), json!(["a", null, true]));
    }

    #[test]
    fn date_times_parse_common_shapes() {
        assert!(Literal::parse_date_time("2024-03-01T10:20:30").is_some());
        assert!(Literal::parse_date_time("2024-03-01 10:20:30.125").is_some());
        assert!(Literal::parse_date_time("yesterday").is_none());
    }

    #[test]
    fn integral_floats_read_as_i64() {
        assert_eq!(Literal::float(3.0).as_i64(), Some(3));
        assert_eq!(Literal::float(3.5).as_i64(), None);
        assert_eq!(Literal::String("3".into()).as_i64(), None);
    }
}
