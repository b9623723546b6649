//! Table descriptions.
//!
//! [`TableSchema`] is what a `SQLite` file declares. [`TableSpec`] is what the
//! pipeline decided after profiling: one logical type per column. The
//! canonical text rendering of a cell ([`ColumnSpec::canonical`]) is defined
//! here so that the cleaned snapshot and the target are compared on equal
//! terms whichever backend returned the value.

use serde::{Deserialize, Serialize};

use crate::value::{hex, LogicalType, Value};

/// Canonical layout for date-only columns.
pub const CANONICAL_DATE: &str = "%Y-%m-%d";
/// Canonical layout for columns with a time component.
pub const CANONICAL_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One column as declared in a `SQLite` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type text (may be empty).
    pub declared_type: String,
    /// Declared `NOT NULL`.
    pub not_null: bool,
    /// Part of the primary key.
    pub primary_key: bool,
}

/// A table as declared in a `SQLite` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    /// Looks up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One column with its resolved logical type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub logical_type: LogicalType,
    /// For timestamp columns: whether values carry a time of day.
    #[serde(default)]
    pub has_time: bool,
    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnSpec {
    /// A column spec.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            has_time: false,
            primary_key: false,
        }
    }

    /// Marks the column as carrying a time of day.
    #[must_use]
    pub const fn with_time(mut self) -> Self {
        self.has_time = true;
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub const fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Canonical text of a cell, or `None` for NULL.
    ///
    /// Values that do not fit the column's type are rendered as-is, so they
    /// never collide with a conforming value.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn canonical(&self, value: &Value) -> Option<String> {
        if value.is_null() {
            return None;
        }
        let text = match (self.logical_type, value) {
            (_, Value::Blob(b)) => hex(b),
            (LogicalType::Integer, Value::Integer(i)) => i.to_string(),
            (LogicalType::Integer, Value::Real(f))
                if f.fract() == 0.0 && f.abs() < 9.0e15 =>
            {
                (*f as i64).to_string()
            }
            (LogicalType::Integer, Value::Boolean(b)) => i64::from(*b).to_string(),
            (LogicalType::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map_or_else(|_| s.clone(), |i| i.to_string()),
            (LogicalType::Float, Value::Real(f)) => f.to_string(),
            (LogicalType::Float, Value::Integer(i)) => (*i as f64).to_string(),
            (LogicalType::Float, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map_or_else(|_| s.clone(), |f| f.to_string()),
            (LogicalType::Boolean, Value::Boolean(b)) => b.to_string(),
            (LogicalType::Boolean, Value::Integer(i)) => (*i != 0).to_string(),
            (LogicalType::Boolean, Value::Text(s)) => {
                parse_bool(s).map_or_else(|| s.clone(), |b| b.to_string())
            }
            (LogicalType::Timestamp, Value::Timestamp(dt)) => {
                if self.has_time {
                    dt.format(CANONICAL_TIMESTAMP).to_string()
                } else {
                    dt.date().format(CANONICAL_DATE).to_string()
                }
            }
            (LogicalType::Timestamp, Value::Date(d)) => {
                if self.has_time {
                    d.and_time(chrono::NaiveTime::MIN)
                        .format(CANONICAL_TIMESTAMP)
                        .to_string()
                } else {
                    d.format(CANONICAL_DATE).to_string()
                }
            }
            (_, other) => other.to_string(),
        };
        Some(text)
    }
}

/// Parses the boolean literals the pipeline recognises.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// A table with resolved column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Canonical rendering of every cell of a row, in column order.
    pub fn canonical_row(&self, values: &[Value]) -> Vec<Option<String>> {
        self.columns
            .iter()
            .zip(values)
            .map(|(c, v)| c.canonical(v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_canonical_integer_across_representations() {
        let c = ColumnSpec::new("n", LogicalType::Integer);
        assert_eq!(c.canonical(&Value::Integer(5)).as_deref(), Some("5"));
        assert_eq!(c.canonical(&Value::Real(5.0)).as_deref(), Some("5"));
        assert_eq!(c.canonical(&Value::from(" 5")).as_deref(), Some("5"));
        assert_eq!(c.canonical(&Value::Null), None);
    }

    #[test]
    fn test_canonical_float() {
        let c = ColumnSpec::new("f", LogicalType::Float);
        assert_eq!(c.canonical(&Value::Real(1.5)), c.canonical(&Value::from("1.50")));
        assert_eq!(c.canonical(&Value::Integer(2)), c.canonical(&Value::Real(2.0)));
    }

    #[test]
    fn test_canonical_boolean() {
        let c = ColumnSpec::new("b", LogicalType::Boolean);
        assert_eq!(c.canonical(&Value::Integer(1)).as_deref(), Some("true"));
        assert_eq!(c.canonical(&Value::Boolean(false)).as_deref(), Some("false"));
        assert_eq!(c.canonical(&Value::from("yes")).as_deref(), Some("true"));
    }

    #[test]
    fn test_canonical_timestamp_date_only() {
        let c = ColumnSpec::new("d", LogicalType::Timestamp);
        assert_eq!(
            c.canonical(&Value::Date(date(2024, 1, 5))).as_deref(),
            Some("2024-01-05")
        );
        assert_eq!(
            c.canonical(&Value::from("2024-01-05")).as_deref(),
            Some("2024-01-05")
        );
    }

    #[test]
    fn test_canonical_timestamp_with_time() {
        let c = ColumnSpec::new("ts", LogicalType::Timestamp).with_time();
        let dt = date(2024, 1, 5).and_hms_opt(13, 4, 5).unwrap();
        assert_eq!(
            c.canonical(&Value::Timestamp(dt)).as_deref(),
            Some("2024-01-05 13:04:05")
        );
        assert_eq!(
            c.canonical(&Value::Date(date(2024, 1, 5))).as_deref(),
            Some("2024-01-05 00:00:00")
        );
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("n"), Some(false));
        assert_eq!(parse_bool("1"), None);
    }

    #[test]
    fn test_spec_serde_defaults() {
        let spec: ColumnSpec =
            serde_json::from_str(r#"{"name":"a","logical_type":"integer"}"#).unwrap();
        assert!(!spec.has_time);
        assert!(!spec.primary_key);
    }
}
