//! Wall-clock timestamps in the formats stored on disk.

use chrono::{SecondsFormat, Utc};

/// Current time as RFC 3339 with millisecond precision (`2024-01-01T00:00:00.000Z`).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}
