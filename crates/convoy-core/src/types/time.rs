//! Timestamp encoding for persisted state.
//! Fixed-width RFC 3339 with microseconds and `Z`, so lexical order in SQLite
//! matches chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Compact form used in backup directory names: `20261019T101500123456Z`.
pub fn compact_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%S%6fZ").to_string()
}
