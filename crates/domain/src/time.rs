//! Timestamp helpers for decoded samples and recording rows.

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC timestamp attached to every decoded sample.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Format a timestamp as RFC 3339 with millisecond precision
/// (e.g. `2024-05-01T10:00:00.125Z`).
#[must_use]
pub fn format_rfc3339(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
