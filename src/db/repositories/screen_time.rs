use anyhow::Result;
use rusqlite::params;

use crate::db::{models::ScreenTimeItem, Database};
use crate::sql_args;

const SCREEN_TIME_LIMIT: i64 = 10;

/// File name of an executable path, accepting either separator.
pub fn executable_display_name(path: &str) -> String {
    path.rsplit(|c: char| c == '\\' || c == '/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
        .to_string()
}

impl Database {
    /// Opens a new foreground session for the pair, crediting its first poll.
    pub fn record_screen_time_start(
        &self,
        executable_path: &str,
        window_title: &str,
        timestamp: i64,
        initial_seconds: u64,
    ) {
        self.enqueue(
            "INSERT INTO screen_time (executable_path, window_title, timestamp, duration_seconds)
             VALUES (?1, ?2, ?3, ?4)",
            sql_args![
                executable_path.to_string(),
                window_title.to_string(),
                timestamp,
                i64::try_from(initial_seconds).unwrap_or(i64::MAX)
            ],
        );
    }

    /// Adds buffered seconds to the most recent record for the pair.
    pub fn add_screen_time(&self, executable_path: &str, window_title: &str, seconds: u64) {
        self.enqueue(
            "UPDATE screen_time
             SET duration_seconds = duration_seconds + ?1
             WHERE id = (
                 SELECT id FROM screen_time
                 WHERE executable_path = ?2 AND window_title = ?3
                 ORDER BY timestamp DESC, id DESC
                 LIMIT 1
             )",
            sql_args![
                i64::try_from(seconds).unwrap_or(i64::MAX),
                executable_path.to_string(),
                window_title.to_string()
            ],
        );
    }

    /// Per-executable totals for records started at or after `since`.
    pub async fn screen_time_since(&self, since: i64) -> Result<Vec<ScreenTimeItem>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT executable_path, SUM(duration_seconds) AS total_duration
                 FROM screen_time
                 WHERE timestamp >= ?1
                 GROUP BY executable_path
                 ORDER BY total_duration DESC
                 LIMIT ?2",
            )?;

            let items = stmt
                .query_map(params![since, SCREEN_TIME_LIMIT], |row| {
                    let executable_path: String = row.get(0)?;
                    Ok(ScreenTimeItem {
                        name: executable_display_name(&executable_path),
                        executable_path,
                        duration_seconds: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
    }

    pub async fn total_screen_time_since(&self, since: i64) -> Result<i64> {
        self.execute(move |conn| {
            let total = conn.query_row(
                "SELECT COALESCE(SUM(duration_seconds), 0) FROM screen_time WHERE timestamp >= ?1",
                params![since],
                |row| row.get(0),
            )?;
            Ok(total)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;

    #[test]
    fn display_name_handles_both_separators() {
        assert_eq!(executable_display_name("C:\\Apps\\code.exe"), "code.exe");
        assert_eq!(executable_display_name("/usr/bin/firefox"), "firefox");
        assert_eq!(executable_display_name("plain"), "plain");
    }

    #[tokio::test]
    async fn flush_lands_on_latest_record_for_pair() {
        let (_dir, db) = open_temp();
        db.record_screen_time_start("/bin/editor", "a.txt", 100, 1);
        db.record_screen_time_start("/bin/editor", "b.txt", 110, 1);
        db.record_screen_time_start("/bin/editor", "a.txt", 120, 1);
        db.add_screen_time("/bin/editor", "a.txt", 4);
        db.flush().await.unwrap();

        let durations: Vec<(i64, i64)> = db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT timestamp, duration_seconds FROM screen_time
                     WHERE window_title = 'a.txt' ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .unwrap();
        assert_eq!(durations, vec![(100, 1), (120, 5)]);

        let items = db.screen_time_since(0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "editor");
        assert_eq!(items[0].duration_seconds, 7);
        assert_eq!(db.total_screen_time_since(115).await.unwrap(), 5);
    }
}
