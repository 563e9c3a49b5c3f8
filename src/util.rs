use chrono::{DateTime, Utc};

/// Nanosecond wall-clock reading used for internal identifiers. Overflows in
/// the year 2262; zero on clocks that cannot represent nanoseconds.
pub fn timestamp_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Internal message id. Unique within one process, ordered by generation time.
pub fn message_id() -> String {
    format!("msg-{}", timestamp_nanos())
}

pub fn to_unix_ms(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

pub fn now_ms() -> i64 {
    to_unix_ms(Utc::now())
}
