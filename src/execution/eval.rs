use std::cmp::Ordering;

use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::execution::Helpers;
use crate::expr::*;

/// Three-valued logic for predicates evaluated on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    pub fn from_bool(b: bool) -> Truth {
        if b { Truth::True } else { Truth::False }
    }

    /// Null is unknown; integers follow the bit convention.
    pub fn from_value(v: &Value) -> Truth {
        match v {
            Value::Bool(b) => Truth::from_bool(*b),
            Value::Number(n) => Truth::from_bool(n.as_f64().is_some_and(|f| f != 0.0)),
            _ => Truth::Unknown,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Null,
        }
    }
}

/// Evaluates the scalar parts of a projector that stay on the client.
/// Columns are resolved through the caller's lookup.
pub struct Eval;

impl Eval {
    pub fn eval_scalar(expr: &Expr, column: &dyn Fn(&ColumnExpr) -> Value) -> Result<Value> {
        match expr {
            Expr::Constant(l) => Ok(l.to_json()),
            Expr::Column(c) => Ok(column(c)),
            Expr::NamedValue(nv) => Self::eval_scalar(&nv.value, column),
            Expr::Binary(b) => {
                let l = Self::eval_scalar(&b.left, column)?;
                let r = Self::eval_scalar(&b.right, column)?;
                Ok(Self::eval_binary(b.op, &l, &r))
            }
            Expr::Unary(u) => {
                let v = Self::eval_scalar(&u.operand, column)?;
                Ok(match u.op {
                    UnaryOp::Not => Truth::from_value(&v).not().into_value(),
                    UnaryOp::Negate => match &v {
                        Value::Number(n) => match n.as_i64() {
                            Some(i) => Helpers::json_i(-i),
                            None => n.as_f64().map(|f| Helpers::json_f(-f)).unwrap_or(Value::Null),
                        },
                        _ => Value::Null,
                    },
                })
            }
            Expr::Conditional(c) => {
                let test = Self::eval_scalar(&c.test, column)?;
                if Truth::from_value(&test) == Truth::True {
                    Self::eval_scalar(&c.if_true, column)
                } else {
                    Self::eval_scalar(&c.if_false, column)
                }
            }
            Expr::IsNull(e) => Ok(Value::Bool(Self::eval_scalar(e, column)?.is_null())),
            Expr::Call(call) => {
                let args = call.args.iter().map(|a| Self::eval_scalar(a, column)).collect::<Result<Vec<_>>>()?;
                Ok(Self::eval_method(call.method, &args))
            }
            Expr::In(i) if i.select.is_none() => {
                let v = Self::eval_scalar(&i.expr, column)?;
                if v.is_null() {
                    return Ok(Value::Null);
                }
                let mut has_null = false;
                for e in &i.values {
                    let ev = Self::eval_scalar(e, column)?;
                    if ev.is_null() {
                        has_null = true;
                    } else if Helpers::value_equal(&v, &ev) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(if has_null { Value::Null } else { Value::Bool(false) })
            }
            Expr::Between(b) => {
                let v = Self::eval_scalar(&b.expr, column)?;
                let lower = Self::eval_scalar(&b.lower, column)?;
                let upper = Self::eval_scalar(&b.upper, column)?;
                let low = Self::cmp3(&v, BinaryOp::GreaterThanOrEqual, &lower);
                Ok(low.and(Self::cmp3(&v, BinaryOp::LessThanOrEqual, &upper)).into_value())
            }
            other => Err(QueryError::unsupported(format!("{} evaluated on the client", other.kind_name()))),
        }
    }

    fn eval_binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
        match op {
            BinaryOp::And => Truth::from_value(l).and(Truth::from_value(r)).into_value(),
            BinaryOp::Or => Truth::from_value(l).or(Truth::from_value(r)).into_value(),
            BinaryOp::Coalesce => if l.is_null() { r.clone() } else { l.clone() },
            op if op.is_comparison() => Self::cmp3(l, op, r).into_value(),
            BinaryOp::Concat => match (l, r) {
                (Value::Null, _) | (_, Value::Null) => Value::Null,
                _ => Value::String(format!("{}{}", Self::text(l), Self::text(r))),
            },
            BinaryOp::Add if l.is_string() || r.is_string() => match (l, r) {
                (Value::Null, _) | (_, Value::Null) => Value::Null,
                _ => Value::String(format!("{}{}", Self::text(l), Self::text(r))),
            },
            op => Self::arithmetic(op, l, r),
        }
    }

    fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Value {
        let (Value::Number(a), Value::Number(b)) = (l, r) else {
            return Value::Null;
        };
        if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
            let v = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Subtract => x.checked_sub(y),
                BinaryOp::Multiply => x.checked_mul(y),
                BinaryOp::Divide => x.checked_div(y),
                BinaryOp::Modulo => x.checked_rem(y),
                _ => None,
            };
            return v.map(Helpers::json_i).unwrap_or(Value::Null);
        }
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Value::Null;
        };
        match op {
            BinaryOp::Add => Helpers::json_f(x + y),
            BinaryOp::Subtract => Helpers::json_f(x - y),
            BinaryOp::Multiply => Helpers::json_f(x * y),
            BinaryOp::Divide if y != 0.0 => Helpers::json_f(x / y),
            BinaryOp::Modulo if y != 0.0 => Helpers::json_f(x % y),
            _ => Value::Null,
        }
    }

    fn cmp3(l: &Value, op: BinaryOp, r: &Value) -> Truth {
        if l.is_null() || r.is_null() {
            return Truth::Unknown;
        }
        match op {
            BinaryOp::Equal => return Truth::from_bool(Helpers::value_equal(l, r)),
            BinaryOp::NotEqual => return Truth::from_bool(!Helpers::value_equal(l, r)),
            _ => {}
        }
        let ord = match (l, r) {
            (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y)),
            },
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        };
        match (op, ord) {
            (_, None) => Truth::Unknown,
            (BinaryOp::LessThan, Some(o)) => Truth::from_bool(o == Ordering::Less),
            (BinaryOp::LessThanOrEqual, Some(o)) => Truth::from_bool(o != Ordering::Greater),
            (BinaryOp::GreaterThan, Some(o)) => Truth::from_bool(o == Ordering::Greater),
            (BinaryOp::GreaterThanOrEqual, Some(o)) => Truth::from_bool(o != Ordering::Less),
            _ => Truth::Unknown,
        }
    }

    fn eval_method(method: Method, args: &[Value]) -> Value {
        match (method, args) {
            (Method::Contains, [Value::String(s), Value::String(t)]) => Value::Bool(s.contains(t.as_str())),
            (Method::StartsWith, [Value::String(s), Value::String(t)]) => Value::Bool(s.starts_with(t.as_str())),
            (Method::EndsWith, [Value::String(s), Value::String(t)]) => Value::Bool(s.ends_with(t.as_str())),
            (Method::ToUpper, [Value::String(s)]) => Value::String(s.to_uppercase()),
            (Method::ToLower, [Value::String(s)]) => Value::String(s.to_lowercase()),
            (Method::Trim, [Value::String(s)]) => Value::String(s.trim().to_string()),
            (Method::Length, [Value::String(s)]) => Helpers::json_i(s.chars().count() as i64),
            (Method::Substring, [Value::String(s), Value::Number(start), rest @ ..]) => {
                let start = start.as_i64().unwrap_or(0).max(0) as usize;
                let chars = s.chars().skip(start);
                let text: String = match rest.first().and_then(Value::as_i64) {
                    Some(len) => chars.take(len.max(0) as usize).collect(),
                    None => chars.collect(),
                };
                Value::String(text)
            }
            (Method::Abs | Method::Round | Method::Floor | Method::Ceiling, [Value::Number(n)]) => {
                if let Some(i) = n.as_i64() {
                    return Helpers::json_i(if method == Method::Abs { i.abs() } else { i });
                }
                let f = n.as_f64().unwrap_or(f64::NAN);
                Helpers::json_f(match method {
                    Method::Abs => f.abs(),
                    Method::Round => f.round(),
                    Method::Floor => f.floor(),
                    _ => f.ceil(),
                })
            }
            _ => Value::Null,
        }
    }

    fn text(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
