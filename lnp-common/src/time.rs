//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a unix timestamp (seconds) back to UTC, None when out of range
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Format a timestamp for a TEXT column
///
/// Fixed microsecond precision and a `Z` suffix keep stored values
/// lexically ordered.
pub fn to_db(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`to_db`] (any RFC 3339 value is accepted)
pub fn parse_db(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Start of the fixed window of `window_secs` that contains `at`, in unix seconds
///
/// Windows are aligned to the unix epoch, so every process computes the
/// same boundaries without coordination.
pub fn fixed_window_start(at: DateTime<Utc>, window_secs: i64) -> i64 {
    let ts = at.timestamp();
    ts - ts.rem_euclid(window_secs.max(1))
}
