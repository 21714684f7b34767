use bstr::ByteSlice;

use crate::proto;

/// Dynamically typed scalar, used for feature attributes and style parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by filters: empty strings, zero and null are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
        }
    }

    /// Loose equality across numeric representations, used by the style
    /// expression language. `Integer(1) == Float(1.0)` here but not with `==`.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Bool(l), Value::Bool(r)) => l == r,
            (Value::Null, Value::Null) => true,
            (l, r) => match (l.numeric(), r.numeric()) {
                (Some(l), Some(r)) => l == r,
                _ => false,
            },
        }
    }

    pub fn loose_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            (l, r) => l.numeric()?.partial_cmp(&r.numeric()?),
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => b.fmt(f),
            Value::Integer(n) => n.fmt(f),
            Value::Float(n) => n.fmt(f),
            Value::String(s) => s.fmt(f),
        }
    }
}

macro_rules! value_from {
    ($($name:ident($ty:ty)),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$name(value.into())
                }
            }
        )*
    }
}

value_from! {Bool(bool), Integer(i64), Integer(i32), Float(f64), Float(f32), String(String), String(&str)}

impl From<&proto::tile::Value> for Value {
    fn from(value: &proto::tile::Value) -> Self {
        if let Some(s) = value.string_value.as_ref() {
            Value::String(s.to_str_lossy().into_owned())
        } else if let Some(n) = value.float_value {
            Value::Float(n as f64)
        } else if let Some(n) = value.double_value {
            Value::Float(n)
        } else if let Some(n) = value.int_value {
            Value::Integer(n)
        } else if let Some(n) = value.uint_value {
            i64::try_from(n)
                .map(Value::Integer)
                .unwrap_or(Value::Float(n as f64))
        } else if let Some(n) = value.sint_value {
            Value::Integer(n)
        } else if let Some(b) = value.bool_value {
            Value::Bool(b)
        } else {
            Value::Null
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(n) = n.as_i64() {
                    Value::Integer(n)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            _ => Value::Null,
        }
    }
}
