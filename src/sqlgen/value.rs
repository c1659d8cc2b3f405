//! Bound parameter values and the ordered parameter sink.

use crate::error::{EngineError, EngineResult};
use crate::sqlgen::Dialect;
use serde_json::Value as JsonValue;

/// A scalar value destined for a bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON scalar. Arrays and objects are rejected; `in` lists
    /// are expanded element-by-element before this is called.
    pub fn from_json(value: &JsonValue) -> EngineResult<Self> {
        match value {
            JsonValue::Null => Ok(SqlValue::Null),
            JsonValue::Bool(b) => Ok(SqlValue::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(SqlValue::Float(f))
                } else {
                    Err(EngineError::invalid_input(format!(
                        "Numeric value {} is out of range",
                        n
                    )))
                }
            }
            JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => Err(EngineError::invalid_input(
                "Filter and record values must be scalars (null, bool, number or string)",
            )),
        }
    }

    /// Render the value as text, for LIKE patterns.
    pub fn as_pattern_text(value: &JsonValue) -> EngineResult<String> {
        match value {
            JsonValue::String(s) => Ok(s.clone()),
            JsonValue::Number(n) => Ok(n.to_string()),
            JsonValue::Bool(b) => Ok(b.to_string()),
            _ => Err(EngineError::invalid_input(
                "'like' operand must be a string, number or bool",
            )),
        }
    }
}

/// A named bound parameter. Names are deterministic
/// (`column_operator_index`) so identical inputs always compile to the same
/// parameter list; the wire placeholder is positional per dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    pub name: String,
    pub value: SqlValue,
}

/// Collects bound parameters in splice order and hands back the matching
/// placeholder text.
#[derive(Debug)]
pub struct ParamSink {
    dialect: Dialect,
    params: Vec<BoundParam>,
}

impl ParamSink {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Append a parameter and return the placeholder to splice into the SQL.
    pub fn bind(&mut self, name: impl Into<String>, value: SqlValue) -> String {
        self.params.push(BoundParam {
            name: name.into(),
            value,
        });
        self.dialect.placeholder(self.params.len())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn into_params(self) -> Vec<BoundParam> {
        self.params
    }
}
