use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, TimeZone, Utc};

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub fn from_unix(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| anyhow!("{field} holds out-of-range timestamp {value}"))
}

/// Local wall-clock rendering used by history listings.
pub fn format_local(value: i64) -> String {
    match Local.timestamp_opt(value, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => value.to_string(),
    }
}

/// Unix timestamp of today's local midnight.
pub fn local_midnight_unix() -> i64 {
    let now = Local::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp())
}

pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_is_not_in_the_future() {
        let midnight = local_midnight_unix();
        assert!(midnight <= unix_now());
        assert!(unix_now() - midnight <= 25 * 3600);
    }
}
