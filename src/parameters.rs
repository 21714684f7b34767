use ahash::AHashMap as HashMap;

use crate::{
    error::{Error, Result},
    value::Value,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ParameterKind {
    Bool,
    Integer,
    Float,
    String,
}

impl ParameterKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Some(ParameterKind::Bool),
            "int" | "integer" => Some(ParameterKind::Integer),
            "float" | "double" | "number" => Some(ParameterKind::Float),
            "string" | "str" => Some(ParameterKind::String),
            _ => None,
        }
    }

    /// Kind inferred from a JSON default when no type is declared.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ParameterKind::Bool,
            Value::Integer(_) => ParameterKind::Integer,
            Value::Float(_) => ParameterKind::Float,
            Value::Null | Value::String(_) => ParameterKind::String,
        }
    }

    pub fn coerce(&self, text: &str) -> Result<Value> {
        let fail = || Error::Conversion {
            value: text.to_string(),
            kind: *self,
        };

        let value = match self {
            ParameterKind::Bool => match text.trim() {
                "true" | "1" => Value::Bool(true),
                "false" | "0" => Value::Bool(false),
                _ => return Err(fail()),
            },
            ParameterKind::Integer => Value::Integer(text.trim().parse().map_err(|_| fail())?),
            ParameterKind::Float => Value::Float(text.trim().parse().map_err(|_| fail())?),
            ParameterKind::String => Value::String(text.to_string()),
        };

        Ok(value)
    }

    /// Converts an already typed value, used for JSON declared values.
    pub fn convert(&self, value: &Value) -> Result<Value> {
        match (self, value) {
            (ParameterKind::Bool, Value::Bool(_))
            | (ParameterKind::Integer, Value::Integer(_))
            | (ParameterKind::Float, Value::Float(_))
            | (ParameterKind::String, Value::String(_)) => Ok(value.clone()),
            (ParameterKind::Float, Value::Integer(n)) => Ok(Value::Float(*n as f64)),
            (ParameterKind::String, v) => Ok(Value::String(v.to_string())),
            (kind, v) => kind.coerce(&v.to_string()),
        }
    }
}

impl std::fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParameterKind::Bool => "bool",
            ParameterKind::Integer => "integer",
            ParameterKind::Float => "float",
            ParameterKind::String => "string",
        };
        f.write_str(name)
    }
}

/// A style parameter as declared by the style document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDecl {
    pub kind: ParameterKind,
    pub default: Value,
    /// Symbolic keys, when present the parameter is an enumeration.
    pub enum_values: Vec<(String, Value)>,
}

impl ParameterDecl {
    pub fn new(kind: ParameterKind, default: Value) -> Self {
        ParameterDecl {
            kind,
            default,
            enum_values: Vec::new(),
        }
    }

    pub fn is_enum(&self) -> bool {
        !self.enum_values.is_empty()
    }

    pub fn enum_value(&self, key: &str) -> Option<&Value> {
        self.enum_values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn enum_key(&self, value: &Value) -> Option<&str> {
        self.enum_values
            .iter()
            .find(|(_, v)| v.loose_eq(value))
            .map(|(k, _)| k.as_str())
    }
}

/// Declared parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    entries: Vec<(String, ParameterDecl)>,
}

impl ParameterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redeclaring a name replaces the declaration in place.
    pub fn insert<S: Into<String>>(&mut self, name: S, decl: ParameterDecl) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = decl,
            None => self.entries.push((name, decl)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDecl> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, d)| d)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterDecl)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn defaults(&self) -> ParameterValues {
        ParameterValues {
            values: self
                .entries
                .iter()
                .map(|(n, d)| (n.clone(), d.default.clone()))
                .collect(),
        }
    }

    /// Textual form of the current value of `name`.
    pub fn format(&self, name: &str, values: &ParameterValues) -> Result<String> {
        let decl = self
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let value = values.get(name).unwrap_or(&decl.default);

        if decl.is_enum() {
            Ok(decl.enum_key(value).unwrap_or_default().to_string())
        } else {
            Ok(value.to_string())
        }
    }

    /// Resolves a textual value for `name`. `Ok(None)` when the name is not
    /// declared or is an enumeration without the given key.
    pub fn resolve(&self, name: &str, text: &str) -> Result<Option<Value>> {
        let Some(decl) = self.get(name) else {
            return Ok(None);
        };

        if decl.is_enum() {
            return Ok(decl.enum_value(text).cloned());
        }

        decl.kind.coerce(text).map(Some)
    }
}

/// Current values of the style parameters. Shared immutably, an update
/// produces a new instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    values: HashMap<String, Value>,
}

impl ParameterValues {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn with_value<S: Into<String>>(&self, name: S, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(name.into(), value);
        ParameterValues { values }
    }
}
