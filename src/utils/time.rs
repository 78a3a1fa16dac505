/// Time utility functions for the notification feed
///
/// All feed timestamps are UTC. Backend rows may carry RFC 3339 strings
/// with an offset or naive `timestamp` columns without one; both are
/// accepted and treated as UTC.
use chrono::{DateTime, NaiveDateTime, Utc};

/// Current UTC time.
///
/// Single entry point so ids and `occurred_at` values produced during one
/// normalization share the same instant.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp in RFC 3339 with second precision.
///
/// # Format
/// RFC 3339: "2026-03-01T08:00:00Z"
pub fn format_utc(datetime: DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Parse a backend timestamp.
///
/// Accepts RFC 3339 (`2026-03-01T08:00:00+02:00`) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` / `YYYY-MM-DD HH:MM:SS[.fff]` values,
/// which are read as UTC. Returns `None` for anything else.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Human-readable distance from `then` to `now` ("5 minutes ago").
///
/// Timestamps in the future (clock skew between device and backend) read
/// as "just now". Anything older than a week is shown as a date.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }

    let (value, unit) = match secs {
        s if s < 3_600 => (s / 60, "minute"),
        s if s < 86_400 => (s / 3_600, "hour"),
        s if s < 7 * 86_400 => (s / 86_400, "day"),
        _ => return format!("on {}", then.format("%Y-%m-%d")),
    };

    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}
