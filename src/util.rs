//! Small helpers shared across modules.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as a timezone-aware UTC timestamp
pub fn timestamp_aware() -> DateTime<Utc> {
    Utc::now()
}

/// ISO-8601 rendering used in persisted log documents
pub fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
