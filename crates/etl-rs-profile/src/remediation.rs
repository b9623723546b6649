//! Cleaning rules derived from a column profile.
//!
//! [`ColumnRemediation::apply`] is the single definition of what cleaning
//! does to a value. The cleaner calls it for every row; the target dry-run
//! calls it for the sample.

use etl_rs_db::schema::parse_bool;
use etl_rs_db::{ColumnSpec, LogicalType, Value};
use serde::{Deserialize, Serialize};

use crate::formats::TimestampFormat;
use crate::inference::is_empty_marker;

/// What cleaning did to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Kept as-is (possibly with a lossless type conversion).
    Unchanged,
    /// Timestamp rewritten to the canonical layout.
    Reencoded,
    /// Empty string replaced with NULL.
    EmptyToNull,
    /// Timestamp no layout could parse, replaced with NULL.
    UnparseableToNull,
}

/// A remediated value and what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Remediated {
    /// The value to write.
    pub value: Value,
    /// What changed.
    pub outcome: Outcome,
}

impl Remediated {
    const fn new(value: Value, outcome: Outcome) -> Self {
        Self { value, outcome }
    }
}

/// Cleaning rules for one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRemediation {
    /// The column with its resolved type.
    pub spec: ColumnSpec,
    /// Layouts tried, in order, when re-encoding timestamps: the dominant
    /// one, then the detected alternates. Every other known layout is
    /// tried after these.
    pub source_formats: Vec<TimestampFormat>,
}

impl ColumnRemediation {
    /// Rules for a column.
    pub const fn new(spec: ColumnSpec, source_formats: Vec<TimestampFormat>) -> Self {
        Self {
            spec,
            source_formats,
        }
    }

    /// Rules that leave text columns alone.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(ColumnSpec::new(name, LogicalType::String), Vec::new())
    }

    /// Applies the rules to one value.
    ///
    /// - String columns are never changed.
    /// - In every other column an empty string becomes NULL.
    /// - Timestamps are re-encoded to the canonical layout; a value no
    ///   layout parses becomes NULL.
    /// - Numeric and boolean text is converted to its typed value; anything
    ///   that does not convert is kept as-is so quality scoring can see it.
    pub fn apply(&self, value: &Value) -> Remediated {
        if self.spec.logical_type == LogicalType::String || value.is_null() {
            return Remediated::new(value.clone(), Outcome::Unchanged);
        }
        if is_empty_marker(value) {
            return Remediated::new(Value::Null, Outcome::EmptyToNull);
        }
        match self.spec.logical_type {
            LogicalType::Timestamp => self.reencode(value),
            LogicalType::Integer => Remediated::new(to_integer(value), Outcome::Unchanged),
            LogicalType::Float => Remediated::new(to_float(value), Outcome::Unchanged),
            LogicalType::Boolean => Remediated::new(to_boolean(value), Outcome::Unchanged),
            LogicalType::String => Remediated::new(value.clone(), Outcome::Unchanged),
        }
    }

    fn reencode(&self, value: &Value) -> Remediated {
        let parsed = match value {
            Value::Timestamp(dt) => Some(*dt),
            Value::Date(d) => Some(d.and_time(chrono::NaiveTime::MIN)),
            Value::Text(s) => self
                .source_formats
                .iter()
                .chain(TimestampFormat::ALL.iter())
                .find_map(|f| f.parse(s)),
            _ => None,
        };
        let Some(dt) = parsed else {
            return Remediated::new(Value::Null, Outcome::UnparseableToNull);
        };
        let canonical = self
            .spec
            .canonical(&Value::Timestamp(dt))
            .map_or(Value::Null, Value::Text);
        let outcome = if canonical == *value {
            Outcome::Unchanged
        } else {
            Outcome::Reencoded
        };
        Remediated::new(canonical, outcome)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_integer(value: &Value) -> Value {
    match value {
        Value::Real(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Integer(*f as i64),
        Value::Boolean(b) => Value::Integer(i64::from(*b)),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_or_else(|_| value.clone(), Value::Integer),
        other => other.clone(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_float(value: &Value) -> Value {
    match value {
        Value::Integer(i) => Value::Real(*i as f64),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map_or_else(|| value.clone(), Value::Real),
        other => other.clone(),
    }
}

fn to_boolean(value: &Value) -> Value {
    match value {
        Value::Integer(0) => Value::Boolean(false),
        Value::Integer(1) => Value::Boolean(true),
        Value::Text(s) => parse_bool(s).map_or_else(|| value.clone(), Value::Boolean),
        other => other.clone(),
    }
}

/// Whether a cleaned value conforms to its column's type.
///
/// Used by the quality score. Nulls are not checked; string columns always
/// conform.
pub fn conforms(spec: &ColumnSpec, value: &Value) -> bool {
    match (spec.logical_type, value) {
        (LogicalType::String, _) | (_, Value::Null) => true,
        (LogicalType::Integer, Value::Integer(_)) => true,
        (LogicalType::Float, Value::Real(_) | Value::Integer(_)) => true,
        (LogicalType::Boolean, Value::Boolean(_)) => true,
        (LogicalType::Boolean, Value::Integer(i)) => *i == 0 || *i == 1,
        (LogicalType::Timestamp, Value::Timestamp(_) | Value::Date(_)) => true,
        (LogicalType::Timestamp, Value::Text(s)) => {
            let layout = if spec.has_time {
                TimestampFormat::IsoDateTime
            } else {
                TimestampFormat::IsoDate
            };
            layout.parse(s).is_some()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date_col() -> ColumnRemediation {
        ColumnRemediation::new(
            ColumnSpec::new("d", LogicalType::Timestamp),
            vec![TimestampFormat::IsoDate, TimestampFormat::DayMonthYearSlash],
        )
    }

    #[test]
    fn test_reencodes_minority_layout() {
        let r = date_col().apply(&Value::from("05/01/2024"));
        assert_eq!(r.value, Value::from("2024-01-05"));
        assert_eq!(r.outcome, Outcome::Reencoded);
    }

    #[test]
    fn test_canonical_value_is_unchanged() {
        let r = date_col().apply(&Value::from("2024-01-05"));
        assert_eq!(r.value, Value::from("2024-01-05"));
        assert_eq!(r.outcome, Outcome::Unchanged);
    }

    #[test]
    fn test_unlisted_layout_still_parses() {
        let r = date_col().apply(&Value::from("05.01.2024"));
        assert_eq!(r.value, Value::from("2024-01-05"));
        assert_eq!(r.outcome, Outcome::Reencoded);
    }

    #[test]
    fn test_unparseable_timestamp_becomes_null() {
        let r = date_col().apply(&Value::from("soon"));
        assert_eq!(r.value, Value::Null);
        assert_eq!(r.outcome, Outcome::UnparseableToNull);
    }

    #[test]
    fn test_time_component_is_kept() {
        let col = ColumnRemediation::new(
            ColumnSpec::new("ts", LogicalType::Timestamp).with_time(),
            vec![TimestampFormat::IsoDateTimeT],
        );
        let r = col.apply(&Value::from("2024-01-05T13:04:05"));
        assert_eq!(r.value, Value::from("2024-01-05 13:04:05"));
    }

    #[test]
    fn test_empty_string_in_numeric_column_becomes_null() {
        let col = ColumnRemediation::new(ColumnSpec::new("n", LogicalType::Integer), Vec::new());
        let r = col.apply(&Value::from(""));
        assert_eq!(r.value, Value::Null);
        assert_eq!(r.outcome, Outcome::EmptyToNull);
        assert_eq!(col.apply(&Value::from("42")).value, Value::Integer(42));
        assert_eq!(col.apply(&Value::from("x")).value, Value::from("x"));
    }

    #[test]
    fn test_string_column_is_left_alone() {
        let col = ColumnRemediation::passthrough("s");
        let r = col.apply(&Value::from(""));
        assert_eq!(r.value, Value::from(""));
        assert_eq!(r.outcome, Outcome::Unchanged);
    }

    #[test]
    fn test_boolean_and_float_conversion() {
        let b = ColumnRemediation::new(ColumnSpec::new("b", LogicalType::Boolean), Vec::new());
        assert_eq!(b.apply(&Value::from("yes")).value, Value::Boolean(true));
        assert_eq!(b.apply(&Value::Integer(0)).value, Value::Boolean(false));
        let f = ColumnRemediation::new(ColumnSpec::new("f", LogicalType::Float), Vec::new());
        assert_eq!(f.apply(&Value::from("1.5")).value, Value::Real(1.5));
        assert_eq!(f.apply(&Value::Integer(2)).value, Value::Real(2.0));
    }

    #[test]
    fn test_conforms() {
        let int = ColumnSpec::new("n", LogicalType::Integer);
        assert!(conforms(&int, &Value::Integer(1)));
        assert!(conforms(&int, &Value::Null));
        assert!(!conforms(&int, &Value::from("x")));
        let date = ColumnSpec::new("d", LogicalType::Timestamp);
        assert!(conforms(&date, &Value::from("2024-01-05")));
        assert!(!conforms(&date, &Value::from("05/01/2024")));
        assert!(conforms(&ColumnSpec::new("s", LogicalType::String), &Value::Blob(vec![1])));
    }
}
