use anyhow::Result;
use rusqlite::{params_from_iter, types::Value, Row};

use crate::db::{
    helpers::{conversion_error, from_unix},
    models::{AppEvent, LeaderboardItem},
    Database,
};
use crate::sql_args;

const LEADERBOARD_LIMIT: i64 = 10;

fn row_to_app_event(row: &Row) -> Result<AppEvent, rusqlite::Error> {
    let start: i64 = row.get("start_time")?;
    let end: Option<i64> = row.get("end_time")?;
    let pid: i64 = row.get("pid")?;

    Ok(AppEvent {
        id: row.get("id")?,
        process_name: row.get("process_name")?,
        pid: u32::try_from(pid).unwrap_or_default(),
        parent_process_name: row.get("parent_process_name")?,
        exe_path: row.get("exe_path")?,
        start_time: from_unix(start, "start_time").map_err(conversion_error)?,
        end_time: end
            .map(|ts| from_unix(ts, "end_time"))
            .transpose()
            .map_err(conversion_error)?,
    })
}

impl Database {
    /// Queues an open event. Ignored by the store if `pid` already has one.
    pub fn log_process_start(
        &self,
        process_name: &str,
        pid: u32,
        parent_process_name: Option<&str>,
        exe_path: Option<&str>,
        start_time: i64,
    ) {
        self.enqueue(
            "INSERT OR IGNORE INTO app_events (process_name, pid, parent_process_name, exe_path, start_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            sql_args![
                process_name.to_string(),
                pid,
                parent_process_name.map(str::to_string),
                exe_path.map(str::to_string),
                start_time,
            ],
        );
    }

    /// Queues the close of whatever event is open for `pid`.
    pub fn log_process_end(&self, pid: u32, end_time: i64) {
        self.enqueue(
            "UPDATE app_events SET end_time = ?1 WHERE pid = ?2 AND end_time IS NULL",
            sql_args![end_time, pid],
        );
    }

    /// `(pid, start_time)` of every event still open.
    pub async fn open_events(&self) -> Result<Vec<(u32, i64)>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT pid, start_time FROM app_events WHERE end_time IS NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(pid, start)| u32::try_from(pid).ok().map(|pid| (pid, start)))
                .collect())
        })
        .await
    }

    /// Top process names by launch count within `[since, until]`.
    pub async fn app_leaderboard(
        &self,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<LeaderboardItem>> {
        self.execute(move |conn| {
            let mut sql = String::from(
                "SELECT process_name, COUNT(*) AS count FROM app_events WHERE 1=1",
            );
            let mut args: Vec<Value> = Vec::new();
            if let Some(since) = since {
                sql.push_str(" AND start_time >= ?");
                args.push(Value::from(since));
            }
            if let Some(until) = until {
                sql.push_str(" AND start_time <= ?");
                args.push(Value::from(until));
            }
            sql.push_str(" GROUP BY process_name ORDER BY count DESC, process_name ASC LIMIT ?");
            args.push(Value::from(LEADERBOARD_LIMIT));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .enumerate()
                .map(|(idx, (process_name, count))| LeaderboardItem {
                    rank: idx as u32 + 1,
                    name: process_name.clone(),
                    process_name,
                    count,
                })
                .collect())
        })
        .await
    }

    /// Events whose lifetime overlaps `[since, until]`, newest first.
    pub async fn search_app_events(
        &self,
        query: Option<String>,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<AppEvent>> {
        self.execute(move |conn| {
            let mut sql = String::from(
                "SELECT id, process_name, pid, parent_process_name, exe_path, start_time, end_time
                 FROM app_events WHERE 1=1",
            );
            let mut args: Vec<Value> = Vec::new();

            if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
                sql.push_str(" AND (process_name LIKE ? OR parent_process_name LIKE ?)");
                let like = format!("%{}%", query.trim());
                args.push(Value::from(like.clone()));
                args.push(Value::from(like));
            }
            if let Some(since) = since {
                sql.push_str(" AND (end_time IS NULL OR end_time >= ?)");
                args.push(Value::from(since));
            }
            if let Some(until) = until {
                sql.push_str(" AND start_time <= ?");
                args.push(Value::from(until));
            }
            sql.push_str(" ORDER BY start_time DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map(params_from_iter(args.iter()), row_to_app_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
        .await
    }
}
