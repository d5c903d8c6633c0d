use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Timestamp assigned to legacy history coordinates, which carry none.
/// The earliest representable instant, so those points order before any real
/// observation, including pre-1970 or negative epoch timestamps.
pub const HISTORY_EPOCH: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Naive formats accepted at the ingestion boundary, read as UTC.
const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Normalize the timestamp shapes seen in source data into one canonical type:
/// RFC 3339, naive ISO (T or space separated, implicitly UTC), or integer epoch seconds.
/// Returns `None` for empty or unrecognized values.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Storage format for graph properties (no timezone, implicitly UTC).
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}
