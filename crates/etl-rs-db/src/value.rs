//! Backend-agnostic values and the logical types the pipeline reasons about.
//!
//! [`Value`] carries data between the source, the cleaned snapshot and the
//! target. [`LogicalType`] is the profiler's vocabulary: every column is
//! inferred to be one of five logical types regardless of what the source
//! declared.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A backend-agnostic representation of a database value.
///
/// # Examples
///
/// ```
/// use etl_rs_db::value::Value;
///
/// assert_eq!(Value::from(42_i64), Value::Integer(42));
/// assert_eq!(Value::from("hello"), Value::Text("hello".to_string()));
/// assert!(Value::from(None::<i64>).is_null());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A 64-bit signed integer.
    Integer(i64),
    /// A 64-bit floating-point number.
    Real(f64),
    /// A UTF-8 string.
    Text(String),
    /// Raw binary data.
    Blob(Vec<u8>),
    /// A boolean.
    Boolean(bool),
    /// A date without time.
    Date(chrono::NaiveDate),
    /// A date and time without timezone.
    Timestamp(chrono::NaiveDateTime),
}

impl Value {
    /// Returns `true` for SQL NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string slice of a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer of an `Integer` value.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Renders the value as text for digests, or `None` for NULL.
    ///
    /// Used where no column type is known (target fingerprints).
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Blob(b) => Some(hex(b)),
            other => Some(other.to_string()),
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Timestamp(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

// ── From implementations ───────────────────────────────────────────────

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<chrono::NaiveDate> for Value {
    fn from(v: chrono::NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<chrono::NaiveDateTime> for Value {
    fn from(v: chrono::NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// The logical column types inferred by the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    /// Free text.
    String,
    /// Whole numbers.
    Integer,
    /// Floating-point numbers.
    Float,
    /// Dates, with or without a time component.
    Timestamp,
    /// Boolean literals.
    Boolean,
}

impl LogicalType {
    /// The lowercase name used in reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Timestamp => "timestamp",
            Self::Boolean => "boolean",
        }
    }

    /// Returns `true` for every type other than `String`.
    pub const fn is_typed(self) -> bool {
        !matches!(self, Self::String)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
