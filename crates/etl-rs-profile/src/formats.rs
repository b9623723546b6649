//! The fixed enumeration of timestamp layouts the profiler recognises.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A timestamp layout. Serialized by its pattern.
///
/// Order matters: when a value parses under several layouts (e.g.
/// `05/01/2024`), the first one in [`TimestampFormat::ALL`] wins, so
/// day-first layouts take precedence over month-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// `2024-01-05`
    #[serde(rename = "YYYY-MM-DD")]
    IsoDate,
    /// `2024-01-05 13:04:05`, optional fraction
    #[serde(rename = "YYYY-MM-DD HH:MM:SS")]
    IsoDateTime,
    /// `2024-01-05T13:04:05`, optional fraction
    #[serde(rename = "YYYY-MM-DDTHH:MM:SS")]
    IsoDateTimeT,
    /// `2024-01-05T13:04:05+02:00`, normalised to UTC
    #[serde(rename = "RFC3339")]
    Rfc3339,
    /// `05/01/2024`
    #[serde(rename = "DD/MM/YYYY")]
    DayMonthYearSlash,
    /// `01/05/2024`
    #[serde(rename = "MM/DD/YYYY")]
    MonthDayYearSlash,
    /// `05-01-2024`
    #[serde(rename = "DD-MM-YYYY")]
    DayMonthYearDash,
    /// `05.01.2024`
    #[serde(rename = "DD.MM.YYYY")]
    DayMonthYearDot,
    /// `2024/01/05`
    #[serde(rename = "YYYY/MM/DD")]
    YearMonthDaySlash,
}

impl TimestampFormat {
    /// Every layout, in precedence order.
    pub const ALL: [Self; 9] = [
        Self::IsoDate,
        Self::IsoDateTime,
        Self::IsoDateTimeT,
        Self::Rfc3339,
        Self::DayMonthYearSlash,
        Self::MonthDayYearSlash,
        Self::DayMonthYearDash,
        Self::DayMonthYearDot,
        Self::YearMonthDaySlash,
    ];

    /// The human-readable pattern.
    pub const fn pattern(self) -> &'static str {
        match self {
            Self::IsoDate => "YYYY-MM-DD",
            Self::IsoDateTime => "YYYY-MM-DD HH:MM:SS",
            Self::IsoDateTimeT => "YYYY-MM-DDTHH:MM:SS",
            Self::Rfc3339 => "RFC3339",
            Self::DayMonthYearSlash => "DD/MM/YYYY",
            Self::MonthDayYearSlash => "MM/DD/YYYY",
            Self::DayMonthYearDash => "DD-MM-YYYY",
            Self::DayMonthYearDot => "DD.MM.YYYY",
            Self::YearMonthDaySlash => "YYYY/MM/DD",
        }
    }

    /// Looks a layout up by pattern.
    pub fn from_pattern(pattern: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.pattern() == pattern)
    }

    /// Whether values in this layout carry a time of day.
    pub const fn has_time(self) -> bool {
        matches!(self, Self::IsoDateTime | Self::IsoDateTimeT | Self::Rfc3339)
    }

    /// Parses `input` strictly under this layout. Date-only layouts yield
    /// midnight. Years outside 1000..=9999 are rejected.
    pub fn parse(self, input: &str) -> Option<NaiveDateTime> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }
        let date = |fmt: &str| {
            NaiveDate::parse_from_str(s, fmt)
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        };
        let parsed = match self {
            Self::IsoDate => date("%Y-%m-%d"),
            Self::IsoDateTime => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok(),
            Self::IsoDateTimeT => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok(),
            Self::Rfc3339 => chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_utc()),
            Self::DayMonthYearSlash => date("%d/%m/%Y"),
            Self::MonthDayYearSlash => date("%m/%d/%Y"),
            Self::DayMonthYearDash => date("%d-%m-%Y"),
            Self::DayMonthYearDot => date("%d.%m.%Y"),
            Self::YearMonthDaySlash => date("%Y/%m/%d"),
        }?;
        (1000..=9999).contains(&parsed.year()).then_some(parsed)
    }

    /// The first layout in precedence order that parses `input`.
    pub fn detect(input: &str) -> Option<(Self, NaiveDateTime)> {
        Self::ALL
            .into_iter()
            .find_map(|f| f.parse(input).map(|dt| (f, dt)))
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pattern())
    }
}
