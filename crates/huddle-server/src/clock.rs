use chrono::{SecondsFormat, Utc};

/// Server timestamp stamped on relayed messages, e.g. `2024-05-01T12:00:00.123Z`.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
