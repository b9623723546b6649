//! A generic database row.

use etl_rs_core::{EtlError, EtlResult};

use crate::value::Value;

/// A row returned by a backend: column names and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> EtlResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            EtlError::Database(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> EtlResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            EtlError::Database(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value of a column.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }
}

/// Conversion from a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts the conversion.
    fn from_value(value: &Value) -> EtlResult<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> EtlResult<Self> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::Text(s) => s
                .parse()
                .map_err(|_| EtlError::Database(format!("Expected integer, got '{s}'"))),
            _ => Err(EtlError::Database(format!(
                "Expected Integer, got {value:?}"
            ))),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> EtlResult<Self> {
        let i = i64::from_value(value)?;
        Self::try_from(i).map_err(|_| EtlError::Database(format!("Expected non-negative integer, got {i}")))
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> EtlResult<Self> {
        match value {
            Value::Real(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as Self),
            _ => Err(EtlError::Database(format!("Expected Real, got {value:?}"))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> EtlResult<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Null => Err(EtlError::Database("Expected Text, got NULL".into())),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> EtlResult<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Integer(i) => Ok(*i != 0),
            _ => Err(EtlError::Database(format!(
                "Expected Boolean, got {value:?}"
            ))),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> EtlResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
