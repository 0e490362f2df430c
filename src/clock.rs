use chrono::Utc;

/// Current wall-clock time in unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Milliseconds in `days` days
pub fn days_to_millis(days: u32) -> i64 {
    chrono::Duration::days(i64::from(days)).num_milliseconds()
}
