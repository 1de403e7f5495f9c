//! Core types for the RegelRecht engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Any value flowing through the engine: parameters, definitions, outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric view; floats truncate toward zero.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Truthiness: `null`, `false`, `0`, `0.0`, NaN, empty string/array/object
    /// are false; everything else is true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

/// Operators supported by the action expression language.
///
/// The `Unknown` catch-all absorbs operator names outside the contract;
/// executing it yields null with a warning diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    // Comparison
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,

    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,

    // Aggregate
    Max,
    Min,

    // Logical
    And,
    Or,

    // Null checks
    IsNull,
    NotNull,

    // Membership
    In,
    NotIn,

    // Conditional
    If,
    Switch,

    // Date
    SubtractDate,

    #[default]
    #[serde(other)]
    Unknown,
}

impl Operation {
    /// Wire-format name, used in trace nodes and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Equals => "EQUALS",
            Operation::NotEquals => "NOT_EQUALS",
            Operation::GreaterThan => "GREATER_THAN",
            Operation::LessThan => "LESS_THAN",
            Operation::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Operation::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Operation::Add => "ADD",
            Operation::Subtract => "SUBTRACT",
            Operation::Multiply => "MULTIPLY",
            Operation::Divide => "DIVIDE",
            Operation::Max => "MAX",
            Operation::Min => "MIN",
            Operation::And => "AND",
            Operation::Or => "OR",
            Operation::IsNull => "IS_NULL",
            Operation::NotNull => "NOT_NULL",
            Operation::In => "IN",
            Operation::NotIn => "NOT_IN",
            Operation::If => "IF",
            Operation::Switch => "SWITCH",
            Operation::SubtractDate => "SUBTRACT_DATE",
            Operation::Unknown => "UNKNOWN",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operation::Equals
                | Operation::NotEquals
                | Operation::GreaterThan
                | Operation::LessThan
                | Operation::GreaterThanOrEqual
                | Operation::LessThanOrEqual
        )
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Operation::Add | Operation::Subtract | Operation::Multiply | Operation::Divide
        )
    }

    /// Operators that evaluate operands lazily (short-circuit).
    pub fn is_lazy(&self) -> bool {
        matches!(
            self,
            Operation::If | Operation::Switch | Operation::And | Operation::Or
        )
    }
}

/// Regulatory layer of a regulation document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegulatoryLayer {
    /// Formal law (wet)
    Wet,
    /// General administrative order (AMvB)
    Amvb,
    /// Ministerial regulation
    MinisterieleRegeling,
    /// Policy rule
    Beleidsregel,
    /// Municipal ordinance
    GemeentelijkeVerordening,
}

impl Default for RegulatoryLayer {
    fn default() -> Self {
        RegulatoryLayer::Wet
    }
}

/// Node type in the execution trace tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceNodeType {
    Root,
    Action,
    Operation,
    Resolve,
    UriCall,
    Requirement,
}

/// How a variable reference was resolved, recorded on resolve trace nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveKind {
    Context,
    Local,
    Output,
    Definition,
    Parameter,
    UriCall,
    DataSource,
    Unknown,
}
