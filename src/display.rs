//! Size summation, age formatting and provider timestamp parsing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub const UNKNOWN: &str = "unknown";
pub const NOT_AVAILABLE: &str = "N/A";

/// Parses a provider size string such as `"8.2G"`, `"44 GB"` or `"1.1T"`
/// into gigabytes.
pub fn parse_size_gb(raw: &str) -> Option<f64> {
    let s = raw.trim().to_ascii_uppercase();
    let (number, factor) = if let Some(n) = s.strip_suffix("TB").or_else(|| s.strip_suffix('T')) {
        (n, 1024.0)
    } else if let Some(n) = s.strip_suffix("GB").or_else(|| s.strip_suffix('G')) {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix("MB").or_else(|| s.strip_suffix('M')) {
        (n, 1.0 / 1024.0)
    } else {
        return None;
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * factor)
}

/// Formats a gigabyte amount the way every provider total is shown.
pub fn format_gb(gb: f64) -> String {
    format!("{:.2}G", gb)
}

/// Sums asset sizes into one display total.
///
/// Returns `"unknown"` when there are no sizes or any of them is unparsable.
pub fn sum_sizes<I, S>(sizes: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut total = 0.0;
    let mut seen = false;
    for size in sizes {
        match parse_size_gb(size.as_ref()) {
            Some(gb) => {
                total += gb;
                seen = true;
            }
            None => return UNKNOWN.to_string(),
        }
    }
    if seen {
        format_gb(total)
    } else {
        UNKNOWN.to_string()
    }
}

/// Renders how long ago a snapshot was taken, relative to `now`.
pub fn format_age(taken_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(taken_at);
    if elapsed < chrono::Duration::zero() {
        return NOT_AVAILABLE.to_string();
    }

    let hours = elapsed.num_hours();
    let minutes = elapsed.num_minutes() % 60;
    match (hours, minutes) {
        (0, 0) => "just now".to_string(),
        (0, m) => format!("{}m ago", m),
        (h, m) => format!("{}h {}m ago", h, m),
    }
}

/// Like [`format_age`] but for a timestamp that may not have parsed.
pub fn age_or_na(taken_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    taken_at
        .map(|t| format_age(t, now))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Parses ISO-8601 block times, including the short `+hh` offset form some
/// mirrors emit.
pub fn parse_iso_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%#z"] {
        if let Ok(t) = DateTime::parse_from_str(s, layout) {
            return Some(t.with_timezone(&Utc));
        }
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    None
}

/// Parses catalog dates like `"26 Dec 2024, 18:17:50"` (UTC).
pub fn parse_catalog_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%d %b %Y, %H:%M:%S")
        .ok()
        .map(|t| Utc.from_utc_datetime(&t))
}
