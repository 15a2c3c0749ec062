use serde_json::{Number, Value};

pub struct Helpers;

impl Helpers {
    /// Canonical text of a key tuple, used to group client-join rows.
    /// A tuple holding a null has no key: null never matches anything.
    pub fn canonical_tuple(vals: &[Value]) -> Option<String> {
        if vals.iter().any(Value::is_null) {
            return None;
        }
        // arrays keep element order, so the text is stable
        serde_json::to_string(&Self::normalize(vals)).ok()
    }

    /// Integral floats compare equal to integers once keyed.
    fn normalize(vals: &[Value]) -> Vec<Value> {
        vals.iter()
            .map(|v| match v {
                Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Self::json_i(f as i64),
                    _ => v.clone(),
                },
                _ => v.clone(),
            })
            .collect()
    }

    pub fn value_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            },
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| Self::value_equal(a, b)),
            (Value::Object(_), Value::Object(_)) => a == b,
            _ => false,
        }
    }

    pub fn json_i(i: i64) -> Value {
        Value::Number(Number::from(i))
    }

    pub fn json_f(f: f64) -> Value {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}
