use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];

/// Parses a `since`/`until` filter value relative to the current instant.
pub fn parse_time(input: &str) -> Result<DateTime<Utc>> {
    parse_time_at(input, Utc::now())
}

/// Accepts the relative presets (`now`, `1 hour ago`, `24 hours ago`,
/// `7 days ago`), RFC 3339, or a naive timestamp read in local time.
pub fn parse_time_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();

    match trimmed.to_lowercase().as_str() {
        "now" => return Ok(now),
        "1 hour ago" => return Ok(now - Duration::hours(1)),
        "24 hours ago" => return Ok(now - Duration::hours(24)),
        "7 days ago" => return Ok(now - Duration::days(7)),
        _ => {}
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            if let Some(local) = Local.from_local_datetime(&naive).earliest() {
                return Ok(local.with_timezone(&Utc));
            }
        }
    }

    Err(anyhow!("could not parse time: {input}"))
}

/// Parses an optional filter bound; empty strings mean "unbounded".
pub fn parse_bound(input: Option<&str>) -> Result<Option<i64>> {
    match input.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_time(value).map(|dt| Some(dt.timestamp())),
    }
}
