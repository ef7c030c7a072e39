use crate::ConversionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Dynamic value carried by ports.
///
/// Serializes as plain JSON. Integers and floats stay distinct through a
/// round trip because serde_json keeps the fractional part of `f64`s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// Declared type of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl DataType {
    pub const ALL: [DataType; 7] = [
        DataType::String,
        DataType::Number,
        DataType::Integer,
        DataType::Boolean,
        DataType::Array,
        DataType::Object,
        DataType::Null,
    ];

    pub fn is_container(self) -> bool {
        matches!(self, DataType::Array | DataType::Object)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
            DataType::Null => "null",
        };
        f.write_str(name)
    }
}

// Rows are the source type, columns the target type, both in `DataType` order:
// string, number, integer, boolean, array, object, null.
const COMPATIBILITY: [[bool; 7]; 7] = [
    [true, true, true, true, true, true, true],
    [true, true, true, true, false, false, true],
    [true, true, true, true, false, false, true],
    [true, true, true, true, false, false, true],
    [true, false, false, false, true, false, true],
    [true, false, false, false, false, true, true],
    [true, true, true, true, true, true, true],
];

/// Whether values of `from` may flow into a port of type `to`.
///
/// `Null` is a wildcard on either side.
pub fn is_compatible(from: DataType, to: DataType) -> bool {
    COMPATIBILITY[from.index()][to.index()]
}

/// Coerce `value` into `target`, or explain why it cannot be.
pub fn convert(value: &Value, target: DataType) -> Result<Value, ConversionError> {
    let source = value.data_type();
    if source == DataType::Null || target == DataType::Null {
        return Ok(value.clone());
    }
    if !is_compatible(source, target) {
        return Err(ConversionError::Incompatible {
            from: source,
            to: target,
        });
    }

    match (value, target) {
        (Value::String(s), DataType::String) => Ok(Value::String(s.clone())),
        (Value::String(s), DataType::Number) => parse_number(s),
        (Value::String(s), DataType::Integer) => parse_integer(s),
        (Value::String(s), DataType::Boolean) => parse_boolean(s),
        (Value::String(s), DataType::Array | DataType::Object) => parse_container(s, target),

        (Value::Number(n), DataType::Number) => finite(*n).map(Value::Number),
        (Value::Number(n), DataType::Integer) => truncate(*n),
        (Value::Number(n), DataType::Boolean) => Ok(Value::Boolean(*n != 0.0 && !n.is_nan())),
        (Value::Number(n), DataType::String) => Ok(Value::String(format_number(*n))),

        (Value::Integer(i), DataType::Integer) => Ok(Value::Integer(*i)),
        (Value::Integer(i), DataType::Number) => Ok(Value::Number(*i as f64)),
        (Value::Integer(i), DataType::Boolean) => Ok(Value::Boolean(*i != 0)),
        (Value::Integer(i), DataType::String) => Ok(Value::String(i.to_string())),

        (Value::Boolean(b), DataType::Boolean) => Ok(Value::Boolean(*b)),
        (Value::Boolean(b), DataType::Number) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        (Value::Boolean(b), DataType::Integer) => Ok(Value::Integer(i64::from(*b))),
        (Value::Boolean(b), DataType::String) => Ok(Value::String(b.to_string())),

        (Value::Array(_), DataType::Array) | (Value::Object(_), DataType::Object) => {
            Ok(value.clone())
        }
        (Value::Array(_) | Value::Object(_), DataType::String) => Ok(Value::String(value.to_json())),

        _ => Err(ConversionError::Incompatible {
            from: source,
            to: target,
        }),
    }
}

fn finite(n: f64) -> Result<f64, ConversionError> {
    if n.is_finite() {
        Ok(n)
    } else {
        Err(ConversionError::NonFinite(n))
    }
}

fn truncate(n: f64) -> Result<Value, ConversionError> {
    let n = finite(n)?.trunc();
    if n < i64::MIN as f64 || n >= i64::MAX as f64 {
        return Err(ConversionError::Parse {
            input: n.to_string(),
            to: DataType::Integer,
        });
    }
    Ok(Value::Integer(n as i64))
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_number(s: &str) -> Result<Value, ConversionError> {
    let parsed = s.trim().parse::<f64>().ok().filter(|n| n.is_finite());
    parsed.map(Value::Number).ok_or_else(|| ConversionError::Parse {
        input: s.to_string(),
        to: DataType::Number,
    })
}

fn parse_integer(s: &str) -> Result<Value, ConversionError> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => truncate(n),
        _ => Err(ConversionError::Parse {
            input: s.to_string(),
            to: DataType::Integer,
        }),
    }
}

fn parse_boolean(s: &str) -> Result<Value, ConversionError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Value::Boolean(true)),
        "false" | "0" => Ok(Value::Boolean(false)),
        _ => Err(ConversionError::Parse {
            input: s.to_string(),
            to: DataType::Boolean,
        }),
    }
}

fn parse_container(s: &str, target: DataType) -> Result<Value, ConversionError> {
    let parsed: Value = serde_json::from_str(s).map_err(|_| ConversionError::Parse {
        input: s.to_string(),
        to: target,
    })?;
    let actual = parsed.data_type();
    if actual != target {
        return Err(ConversionError::Shape {
            expected: target,
            actual,
        });
    }
    Ok(parsed)
}

impl Value {
    /// Infer the port type this value naturally belongs to.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Integer(_) => DataType::Integer,
            Value::Number(_) => DataType::Number,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array,
            Value::Object(_) => DataType::Object,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Compact JSON text of this value.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => f.write_str(&other.to_json()),
        }
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

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
