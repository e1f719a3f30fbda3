//! Values flowing through the engine: conversion from GraphQL literals and the trackable value
//! lifecycle.
use apollo_compiler::ast;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
use serde_json_bytes::Value;
use time::OffsetDateTime;

use crate::error::MaterializerError;
use crate::path::OperationPath;

/// Request variables, keyed by variable name.
pub type Variables = Map<ByteString, Value>;

/// Converts a GraphQL value into JSON.
///
/// Returns `Ok(None)` when the value is (or consists of) a variable absent from `variables`,
/// which callers treat as "no caller value".
pub fn convert_value(
    value: &ast::Value,
    variables: &Variables,
    path: &OperationPath,
) -> Result<Option<Value>, MaterializerError> {
    Ok(Some(match value {
        ast::Value::Null => Value::Null,
        ast::Value::Variable(name) => match variables.get(name.as_str()) {
            Some(value) => value.clone(),
            None => return Ok(None),
        },
        ast::Value::Enum(name) => Value::String(name.as_str().into()),
        ast::Value::String(s) => Value::String(s.as_str().into()),
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::Int(i) => {
            let s = i.to_string();
            match s.parse::<i64>() {
                Ok(i) => Value::from(i),
                Err(overflow) => match s.parse::<f64>() {
                    Ok(number) if number.is_finite() => float(path, number)?,
                    _ => {
                        return Err(MaterializerError::conversion_caused(
                            path,
                            "integer is out of range for a 64-bit float",
                            overflow,
                        ));
                    }
                },
            }
        }
        ast::Value::Float(f) => match f.try_to_f64() {
            Ok(number) => float(path, number)?,
            // FloatOverflowError does not implement Error, so only its message is kept.
            Err(overflow) => {
                return Err(MaterializerError::conversion_caused(
                    path,
                    "number is out of range for a 64-bit float",
                    overflow.to_string(),
                ));
            }
        },
        ast::Value::List(items) => {
            let mut converted = Vec::with_capacity(items.len());
            for item in items {
                match convert_value(item, variables, path)? {
                    Some(item) => converted.push(item),
                    // A missing variable inside a list is a null element.
                    None => converted.push(Value::Null),
                }
            }
            Value::Array(converted)
        }
        ast::Value::Object(fields) => {
            let mut converted = Map::new();
            for (name, field) in fields {
                if let Some(field) = convert_value(field, variables, path)? {
                    converted.insert(ByteString::from(name.as_str()), field);
                }
            }
            Value::Object(converted)
        }
    }))
}

fn float(path: &OperationPath, number: f64) -> Result<Value, MaterializerError> {
    serde_json::Number::from_f64(number)
        .map(Value::Number)
        .ok_or_else(|| MaterializerError::conversion(path, "number is not representable in JSON"))
}

/// A value with a lifecycle used to decide what may be cached externally.
///
/// Transitions only go forward: Planned, then Calculated, then Tracked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TrackableValue {
    /// The value has not been produced yet.
    Planned,
    /// Freshly computed by a backend call.
    Calculated {
        value: Value,
        #[serde(with = "time::serde::rfc3339")]
        calculated_at: OffsetDateTime,
    },
    /// Known to be valid since the given instant; the only state eligible for caching.
    Tracked {
        value: Value,
        #[serde(with = "time::serde::rfc3339")]
        valid_since: OffsetDateTime,
    },
}

impl TrackableValue {
    pub fn calculated(value: Value, calculated_at: OffsetDateTime) -> Self {
        Self::Calculated {
            value,
            calculated_at,
        }
    }

    pub fn tracked(value: Value, valid_since: OffsetDateTime) -> Self {
        Self::Tracked { value, valid_since }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Planned => None,
            Self::Calculated { value, .. } | Self::Tracked { value, .. } => Some(value),
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Planned => None,
            Self::Calculated { value, .. } | Self::Tracked { value, .. } => Some(value),
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked { .. })
    }

    pub fn valid_since(&self) -> Option<OffsetDateTime> {
        match self {
            Self::Tracked { valid_since, .. } => Some(*valid_since),
            _ => None,
        }
    }

    /// Moves a Calculated value to Tracked. Any other state is returned unchanged.
    pub fn track(self, valid_since: OffsetDateTime) -> Self {
        match self {
            Self::Calculated { value, .. } => Self::Tracked { value, valid_since },
            other => other,
        }
    }

    /// Replaces the wrapped value, keeping the state and its timestamp.
    pub fn map_value(self, f: impl FnOnce(Value) -> Value) -> Self {
        match self {
            Self::Planned => Self::Planned,
            Self::Calculated {
                value,
                calculated_at,
            } => Self::Calculated {
                value: f(value),
                calculated_at,
            },
            Self::Tracked { value, valid_since } => Self::Tracked {
                value: f(value),
                valid_since,
            },
        }
    }
}
