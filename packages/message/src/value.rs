//! The Value type - one node of an RPC argument tree.
//!
//! A Value is either a primitive, a nested [`Message`] (a named, ordered
//! group of further values), or an ordered sequence of values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Message};

/// A dynamically typed argument or return value.
///
/// The variant chosen at construction never changes. Reading it as another
/// primitive goes through the `as_*` accessors, which only accept the
/// conversions below:
///
/// | accessor     | accepts                                          |
/// |--------------|--------------------------------------------------|
/// | `as_integer` | `Integer`, `Text` holding a decimal integer      |
/// | `as_float`   | `Float`, `Integer`, `Text` holding a number      |
/// |              | (integers beyond ±2^53 round to the nearest f64) |
/// | `as_text`    | `Text`, `Integer`, `Float`, `Bool`               |
/// | `as_bool`    | `Bool`, `Text` holding `true`/`false`/`1`/`0`    |
///
/// Text is accepted by the numeric accessors because untyped wire elements
/// decode to text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value. Also what lookups return for a missing name.
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Named, ordered child values.
    Struct(Message),
    /// Ordered sequence of values.
    Array(Vec<Value>),
}

/// Shared absent value handed out by failed lookups.
pub(crate) static ABSENT: Value = Value::Null;

impl Value {
    /// Create the absent value.
    pub fn null() -> Self {
        Value::Null
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Value::Struct(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Name of the stored variant, as used in `TypeMismatch` errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    pub fn as_integer(&self) -> Result<i64, Error> {
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Text(s) => s.trim().parse().map_err(|_| self.mismatch("integer")),
            _ => Err(self.mismatch("integer")),
        }
    }

    pub fn as_float(&self) -> Result<f64, Error> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            Value::Text(s) => s.trim().parse().map_err(|_| self.mismatch("float")),
            _ => Err(self.mismatch("float")),
        }
    }

    pub fn as_text(&self) -> Result<String, Error> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(self.mismatch("text")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, Error> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Text(s) => match s.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.mismatch("boolean")),
            },
            _ => Err(self.mismatch("boolean")),
        }
    }

    /// Borrow the text without rendering other variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Message> {
        match self {
            Value::Struct(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Struct(m) => write!(f, "{}", m),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Struct(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
