//! The internal (validated) value representation shared by every datatype.
//!
//! Stands in for frappy's dynamically typed python values (`frappy/datatypes.py`):
//! once `DataType::validate` accepts a value it is always held as a `Value`,
//! never as raw JSON, so downstream code (caches, comparisons, formatting)
//! never has to re-inspect a `serde_json::Value` shape.

use indexmap::IndexMap;
use serde_json::Number;

use crate::errors::{Result, SecopError};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Enum values are stored as their integer code; the mapping back to a
    /// name lives on the datatype, not the value.
    Enum(i64),
    String(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Struct(IndexMap<String, Value>),
    /// `null` — used as the result of a valueless command, and as the
    /// `constant`/`default` placeholder before a real value exists.
    None,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Enum(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) | Value::Enum(i) => Some(*i),
            Value::Bool(b) => Some(if *b { 1 } else { 0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Enum(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Blob(b) => {
                use base64::Engine;
                serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
            },
            Value::Array(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            },
            Value::Struct(members) => serde_json::Value::Object(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::None => serde_json::Value::Null,
        }
    }
}

/// `Blob`'s wire encoding (spec §3) is plain standard base64.
pub mod base64_lite {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    pub fn encode(data: &[u8]) -> String {
        STANDARD.encode(data)
    }

    pub fn decode(s: &str) -> super::Result<Vec<u8>> {
        STANDARD
            .decode(s)
            .map_err(|e| super::SecopError::WrongType(format!("invalid base64 blob: {e}")))
    }
}

pub(crate) fn wrong_type(msg: impl Into<String>) -> SecopError {
    SecopError::WrongType(msg.into())
}

pub(crate) fn range_error(msg: impl Into<String>) -> SecopError {
    SecopError::RangeError(msg.into())
}
