//! Type and format inference over a column sample.
//!
//! [`infer`] is a pure function: it sees only the declared type and the
//! sampled values, so it is tested without any database.
//!
//! Every non-empty value is tried against an ordered list of candidate
//! interpretations. The candidate with the most matches becomes the
//! inferred type (ties go to the earlier candidate) and its match rate is
//! the confidence. Nulls and empty strings are counted separately and do
//! not take part in the vote.

use serde::{Deserialize, Serialize};

use etl_rs_db::schema::parse_bool;
use etl_rs_db::{LogicalType, Value};

use crate::formats::TimestampFormat;

/// Slack when comparing a confidence against the floor.
const CONFIDENCE_EPSILON: f64 = 1e-9;

/// One interpretation a value can be tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// Whole number.
    Integer,
    /// Finite real number.
    Float,
    /// Boolean literal (`true`/`false`/`yes`/`no`, `0`/`1`).
    Boolean,
    /// Timestamp in one layout.
    Timestamp(TimestampFormat),
    /// Free text.
    String,
}

impl Candidate {
    /// The logical type this candidate stands for.
    pub const fn logical_type(self) -> LogicalType {
        match self {
            Self::Integer => LogicalType::Integer,
            Self::Float => LogicalType::Float,
            Self::Boolean => LogicalType::Boolean,
            Self::Timestamp(_) => LogicalType::Timestamp,
            Self::String => LogicalType::String,
        }
    }

    /// Whether `value` (non-null, non-empty) fits this candidate. The
    /// string candidate is resolved by the caller.
    #[allow(clippy::cast_precision_loss)]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Integer, Value::Real(f)) => f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15,
            (Self::Integer, Value::Text(s)) => s.trim().parse::<i64>().is_ok(),
            (Self::Float, Value::Integer(_) | Value::Real(_)) => true,
            (Self::Float, Value::Text(s)) => s.trim().parse::<f64>().is_ok_and(f64::is_finite),
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Boolean, Value::Integer(i)) => *i == 0 || *i == 1,
            (Self::Boolean, Value::Text(s)) => parse_bool(s).is_some(),
            (Self::Timestamp(_), Value::Timestamp(_) | Value::Date(_)) => true,
            (Self::Timestamp(fmt), Value::Text(s)) => fmt.parse(s).is_some(),
            _ => false,
        }
    }
}

/// Maps a declared column type to a logical type using `SQLite` affinity
/// rules. `BOOL` and `DATE`/`TIME` are recognised before the affinity
/// rules. Columns without a declared type (or `BLOB`) yield `None`.
pub fn declared_logical_type(declared: &str) -> Option<LogicalType> {
    let t = declared.to_ascii_uppercase();
    if t.trim().is_empty() {
        None
    } else if t.contains("BOOL") {
        Some(LogicalType::Boolean)
    } else if t.contains("DATE") || t.contains("TIME") {
        Some(LogicalType::Timestamp)
    } else if t.contains("INT") {
        Some(LogicalType::Integer)
    } else if t.contains("CHAR") || t.contains("CLOB") || t.contains("TEXT") {
        Some(LogicalType::String)
    } else if t.contains("BLOB") {
        None
    } else {
        // REAL, FLOA, DOUB and NUMERIC affinity.
        Some(LogicalType::Float)
    }
}

/// Candidates in evaluation order for a declared type: those of the
/// declared type first, then integer, float, boolean, every timestamp
/// layout, string last.
pub fn candidates(declared: Option<LogicalType>) -> Vec<Candidate> {
    let mut all = vec![Candidate::Integer, Candidate::Float, Candidate::Boolean];
    all.extend(TimestampFormat::ALL.into_iter().map(Candidate::Timestamp));
    all.push(Candidate::String);

    let Some(declared) = declared else {
        return all;
    };
    let (mut first, rest): (Vec<_>, Vec<_>) = all
        .into_iter()
        .partition(|c| c.logical_type() == declared);
    first.extend(rest);
    first
}

/// How many sampled values used an alternate timestamp layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCount {
    /// The layout.
    pub format: TimestampFormat,
    /// Values in that layout.
    pub count: usize,
}

/// Outcome of inference for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Inferred logical type.
    pub logical_type: LogicalType,
    /// Dominant layout for timestamp columns.
    pub format: Option<TimestampFormat>,
    /// Match rate of the winning candidate, in `[0, 1]`.
    pub confidence: f64,
    /// Whether timestamps carry a time of day.
    pub has_time: bool,
    /// Values that took part in the vote.
    pub sampled: usize,
    /// Null values in the sample.
    pub null_count: usize,
    /// Empty (or whitespace-only) strings in the sample.
    pub empty_count: usize,
    /// Below the confidence floor.
    pub ambiguous: bool,
    /// Minority timestamp layouts, in precedence order.
    pub alternate_formats: Vec<FormatCount>,
    /// Values that fit neither the inferred type nor, for timestamps, any
    /// known layout.
    pub malformed_count: usize,
}

/// Whether a value counts as an empty-string marker.
pub fn is_empty_marker(value: &Value) -> bool {
    matches!(value, Value::Text(s) if s.trim().is_empty())
}

/// Infers the logical type of a column from its declared type and sample.
#[allow(clippy::cast_precision_loss)]
pub fn infer(declared_type: &str, values: &[Value], confidence_floor: f64) -> InferenceResult {
    let declared = declared_logical_type(declared_type);
    let order = candidates(declared);
    let textual = matches!(declared, Some(LogicalType::String) | None);

    let mut null_count = 0;
    let mut empty_count = 0;
    let mut voting: Vec<&Value> = Vec::with_capacity(values.len());
    for v in values {
        if v.is_null() {
            null_count += 1;
        } else if is_empty_marker(v) {
            empty_count += 1;
        } else {
            voting.push(v);
        }
    }

    let mut matches = vec![0usize; order.len()];
    for v in &voting {
        let mut typed_hit = false;
        for (i, c) in order.iter().enumerate() {
            if *c == Candidate::String {
                continue;
            }
            if c.accepts(v) {
                matches[i] += 1;
                typed_hit = true;
            }
        }
        let string_hit = if textual {
            matches!(v, Value::Text(_))
        } else {
            !typed_hit
        };
        if string_hit {
            if let Some(i) = order.iter().position(|c| *c == Candidate::String) {
                matches[i] += 1;
            }
        }
    }

    let sampled = voting.len();
    if sampled == 0 {
        let logical_type = declared.unwrap_or(LogicalType::String);
        return InferenceResult {
            logical_type,
            format: (logical_type == LogicalType::Timestamp).then_some(TimestampFormat::IsoDate),
            confidence: 1.0,
            has_time: false,
            sampled,
            null_count,
            empty_count,
            ambiguous: false,
            alternate_formats: Vec::new(),
            malformed_count: 0,
        };
    }

    let mut best = 0;
    for i in 1..order.len() {
        if matches[i] > matches[best] {
            best = i;
        }
    }
    let winner = order[best];
    let confidence = matches[best] as f64 / sampled as f64;

    let (format, alternate_formats, malformed_count) = match winner {
        Candidate::Timestamp(primary) => {
            let (alternates, malformed) = minority_layouts(primary, &voting);
            (Some(primary), alternates, malformed)
        }
        _ => (None, Vec::new(), sampled - matches[best]),
    };
    let has_time = format.is_some_and(TimestampFormat::has_time)
        || alternate_formats.iter().any(|a| a.format.has_time());

    InferenceResult {
        logical_type: winner.logical_type(),
        format,
        confidence,
        has_time,
        sampled,
        null_count,
        empty_count,
        ambiguous: confidence + CONFIDENCE_EPSILON < confidence_floor,
        alternate_formats,
        malformed_count,
    }
}

/// Attributes every value the primary layout rejects to the first layout
/// that accepts it; values no layout accepts are malformed.
fn minority_layouts(primary: TimestampFormat, values: &[&Value]) -> (Vec<FormatCount>, usize) {
    let mut counts = [0usize; TimestampFormat::ALL.len()];
    let mut malformed = 0;
    for v in values {
        if Candidate::Timestamp(primary).accepts(v) {
            continue;
        }
        let Value::Text(s) = v else {
            malformed += 1;
            continue;
        };
        match TimestampFormat::ALL.iter().position(|f| f.parse(s).is_some()) {
            Some(i) => counts[i] += 1,
            None => malformed += 1,
        }
    }
    let alternates = TimestampFormat::ALL
        .into_iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .map(|(format, count)| FormatCount { format, count })
        .collect();
    (alternates, malformed)
}

/// Whether a value in a timestamp column is malformed: present, not
/// empty, and unparseable under every layout.
pub fn is_malformed_timestamp(value: &Value) -> bool {
    match value {
        Value::Null | Value::Timestamp(_) | Value::Date(_) => false,
        Value::Text(s) => !s.trim().is_empty() && TimestampFormat::detect(s).is_none(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::from(*s)).collect()
    }

    fn dates(iso: usize, dmy: usize, garbage: usize) -> Vec<Value> {
        let mut v = Vec::new();
        for i in 0..iso {
            v.push(Value::Text(format!("2024-01-{:02}", i % 28 + 1)));
        }
        for i in 0..dmy {
            v.push(Value::Text(format!("{:02}/02/2024", i % 28 + 1)));
        }
        for i in 0..garbage {
            v.push(Value::Text(format!("not-a-date-{i}")));
        }
        v
    }

    #[test]
    fn test_declared_affinity() {
        assert_eq!(declared_logical_type("INTEGER"), Some(LogicalType::Integer));
        assert_eq!(declared_logical_type("varchar(20)"), Some(LogicalType::String));
        assert_eq!(declared_logical_type("TIMESTAMP"), Some(LogicalType::Timestamp));
        assert_eq!(declared_logical_type("BOOLEAN"), Some(LogicalType::Boolean));
        assert_eq!(declared_logical_type("DOUBLE"), Some(LogicalType::Float));
        assert_eq!(declared_logical_type("NUMERIC(10,2)"), Some(LogicalType::Float));
        assert_eq!(declared_logical_type(""), None);
        assert_eq!(declared_logical_type("BLOB"), None);
    }

    #[test]
    fn test_declared_candidates_come_first() {
        let order = candidates(Some(LogicalType::Timestamp));
        assert_eq!(order[0], Candidate::Timestamp(TimestampFormat::IsoDate));
        assert_eq!(order[TimestampFormat::ALL.len()], Candidate::Integer);
        assert_eq!(*order.last().unwrap(), Candidate::String);
        assert_eq!(candidates(None)[0], Candidate::Integer);
    }

    #[test]
    fn test_integer_column() {
        let values = vec![Value::Integer(1), Value::from(" 2 "), Value::Real(3.0)];
        let r = infer("INTEGER", &values, 0.95);
        assert_eq!(r.logical_type, LogicalType::Integer);
        assert!((r.confidence - 1.0).abs() < f64::EPSILON);
        assert!(!r.ambiguous);
    }

    #[test]
    fn test_integer_beats_boolean_on_tie_unless_declared() {
        let values = vec![Value::Integer(0), Value::Integer(1)];
        assert_eq!(infer("", &values, 0.95).logical_type, LogicalType::Integer);
        assert_eq!(infer("BOOL", &values, 0.95).logical_type, LogicalType::Boolean);
    }

    #[test]
    fn test_text_column_keeps_declared_string() {
        let r = infer("TEXT", &texts(&["123", "abc", "2024-01-01"]), 0.95);
        assert_eq!(r.logical_type, LogicalType::String);
        assert!((r.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_untyped_numbers_become_float() {
        let r = infer("", &texts(&["1.5", "2", "3.25"]), 0.95);
        assert_eq!(r.logical_type, LogicalType::Float);
    }

    #[test]
    fn test_nulls_and_empties_are_counted_not_voted() {
        let values = vec![
            Value::Integer(1),
            Value::Null,
            Value::from(""),
            Value::from("  "),
            Value::Integer(2),
        ];
        let r = infer("INTEGER", &values, 0.95);
        assert_eq!(r.sampled, 2);
        assert_eq!(r.null_count, 1);
        assert_eq!(r.empty_count, 2);
        assert!((r.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_minority_date_layout_is_reported() {
        let r = infer("TIMESTAMP", &dates(991, 9, 0), 0.95);
        assert_eq!(r.logical_type, LogicalType::Timestamp);
        assert_eq!(r.format, Some(TimestampFormat::IsoDate));
        assert!(r.confidence >= 0.95);
        assert!(!r.ambiguous);
        assert!(!r.has_time);
        assert_eq!(
            r.alternate_formats,
            vec![FormatCount {
                format: TimestampFormat::DayMonthYearSlash,
                count: 9
            }]
        );
        assert_eq!(r.malformed_count, 0);
    }

    #[test]
    fn test_fifteen_percent_garbage_is_ambiguous() {
        let r = infer("TIMESTAMP", &dates(85, 0, 15), 0.95);
        assert_eq!(r.logical_type, LogicalType::Timestamp);
        assert!(r.ambiguous);
        assert_eq!(r.malformed_count, 15);
    }

    #[test]
    fn test_five_percent_garbage_is_not_ambiguous() {
        let r = infer("TIMESTAMP", &dates(95, 0, 5), 0.95);
        assert!(!r.ambiguous);
        assert_eq!(r.malformed_count, 5);
    }

    #[test]
    fn test_datetime_layout_sets_has_time() {
        let r = infer("DATETIME", &texts(&["2024-01-01 10:00:00", "2024-01-02 11:30:00"]), 0.95);
        assert_eq!(r.format, Some(TimestampFormat::IsoDateTime));
        assert!(r.has_time);
    }

    #[test]
    fn test_all_null_column_defaults_to_declared() {
        let r = infer("REAL", &[Value::Null, Value::Null], 0.95);
        assert_eq!(r.logical_type, LogicalType::Float);
        assert_eq!(r.sampled, 0);
        assert!(!r.ambiguous);
    }

    #[test]
    fn test_malformed_timestamp_predicate() {
        assert!(is_malformed_timestamp(&Value::from("yesterday")));
        assert!(!is_malformed_timestamp(&Value::from("05.01.2024")));
        assert!(!is_malformed_timestamp(&Value::from("")));
        assert!(!is_malformed_timestamp(&Value::Null));
    }
}
