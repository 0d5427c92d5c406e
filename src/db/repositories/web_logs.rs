use anyhow::Result;
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension};

use crate::db::{
    helpers::{conversion_error, format_local, from_unix},
    models::{WebLeaderboardItem, WebMetadata},
    Database,
};
use crate::sql_args;

const LEADERBOARD_LIMIT: i64 = 10;

// Host part of `url`: everything after `//` up to the next `/`.
const DOMAIN_EXPR: &str = "CASE
        WHEN INSTR(SUBSTR(url, INSTR(url, '//') + 2), '/') > 0
        THEN SUBSTR(url, INSTR(url, '//') + 2, INSTR(SUBSTR(url, INSTR(url, '//') + 2), '/') - 1)
        ELSE SUBSTR(url, INSTR(url, '//') + 2)
    END";

impl Database {
    pub fn log_web_visit(&self, url: &str, title: &str, timestamp: i64) {
        self.enqueue(
            "INSERT INTO web_events (url, title, timestamp) VALUES (?1, ?2, ?3)",
            sql_args![url.to_string(), title.to_string(), timestamp],
        );
    }

    pub fn upsert_web_metadata(&self, domain: &str, title: &str, icon_url: &str, timestamp: i64) {
        self.enqueue(
            "INSERT INTO web_metadata (domain, title, icon_url, timestamp)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(domain) DO UPDATE SET
                 title = excluded.title,
                 icon_url = excluded.icon_url,
                 timestamp = excluded.timestamp",
            sql_args![
                domain.to_string(),
                title.to_string(),
                icon_url.to_string(),
                timestamp
            ],
        );
    }

    pub async fn get_web_metadata(&self, domain: &str) -> Result<Option<WebMetadata>> {
        let domain = domain.to_string();
        self.execute(move |conn| {
            let meta = conn
                .query_row(
                    "SELECT domain, title, icon_url, timestamp FROM web_metadata WHERE domain = ?1",
                    params![domain],
                    |row| {
                        let ts: i64 = row.get(3)?;
                        Ok(WebMetadata {
                            domain: row.get(0)?,
                            title: row.get(1)?,
                            icon_url: row.get(2)?,
                            timestamp: Some(from_unix(ts, "timestamp").map_err(conversion_error)?),
                        })
                    },
                )
                .optional()?;
            Ok(meta)
        })
        .await
    }

    /// `[local timestamp, url]` rows in `[since, until]`, newest first.
    pub async fn web_logs(
        &self,
        query: Option<String>,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<[String; 2]>> {
        self.execute(move |conn| {
            let mut sql = String::from("SELECT url, timestamp FROM web_events WHERE 1=1");
            let mut args: Vec<Value> = Vec::new();

            if let Some(query) = query.filter(|q| !q.trim().is_empty()) {
                sql.push_str(" AND url LIKE ?");
                args.push(Value::from(format!("%{}%", query.trim())));
            }
            if let Some(since) = since {
                sql.push_str(" AND timestamp >= ?");
                args.push(Value::from(since));
            }
            if let Some(until) = until {
                sql.push_str(" AND timestamp <= ?");
                args.push(Value::from(until));
            }
            sql.push_str(" ORDER BY timestamp DESC, id DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    let url: String = row.get(0)?;
                    let ts: i64 = row.get(1)?;
                    Ok([format_local(ts), url])
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Top domains by visit count, with cached title and icon when known.
    pub async fn web_leaderboard(
        &self,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<WebLeaderboardItem>> {
        self.execute(move |conn| {
            let mut sql = format!(
                "SELECT v.domain, v.count, m.title, m.icon_url
                 FROM (
                     SELECT {DOMAIN_EXPR} AS domain, COUNT(*) AS count
                     FROM web_events WHERE 1=1"
            );
            let mut args: Vec<Value> = Vec::new();
            if let Some(since) = since {
                sql.push_str(" AND timestamp >= ?");
                args.push(Value::from(since));
            }
            if let Some(until) = until {
                sql.push_str(" AND timestamp <= ?");
                args.push(Value::from(until));
            }
            sql.push_str(
                " GROUP BY domain ORDER BY count DESC, domain ASC LIMIT ?
                 ) AS v
                 LEFT JOIN web_metadata m ON m.domain = v.domain
                 ORDER BY v.count DESC, v.domain ASC",
            );
            args.push(Value::from(LEADERBOARD_LIMIT));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .enumerate()
                .map(|(idx, (domain, count, title, icon))| WebLeaderboardItem {
                    rank: idx as u32 + 1,
                    domain,
                    title: title.unwrap_or_default(),
                    icon: icon.unwrap_or_default(),
                    count,
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_support::open_temp;

    #[tokio::test]
    async fn metadata_upsert_keeps_one_row_per_domain() {
        let (_dir, db) = open_temp();
        db.upsert_web_metadata("rust-lang.org", "Rust", "a.png", 10);
        db.upsert_web_metadata("rust-lang.org", "Rust Lang", "b.png", 20);
        db.flush().await.unwrap();

        let meta = db.get_web_metadata("rust-lang.org").await.unwrap().unwrap();
        assert_eq!(meta.title, "Rust Lang");
        assert_eq!(meta.icon_url, "b.png");
        assert_eq!(meta.timestamp.map(|t| t.timestamp()), Some(20));
        assert!(db.get_web_metadata("missing.org").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leaderboard_groups_by_host_and_enriches() {
        let (_dir, db) = open_temp();
        db.log_web_visit("https://docs.rs/tokio", "tokio", 100);
        db.log_web_visit("https://docs.rs/serde", "serde", 110);
        db.log_web_visit("https://github.com", "GitHub", 120);
        db.log_web_visit("https://docs.rs/old", "old", 5);
        db.upsert_web_metadata("docs.rs", "Docs.rs", "icon.png", 100);
        db.flush().await.unwrap();

        let board = db.web_leaderboard(Some(50), None).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].domain, "docs.rs");
        assert_eq!(board[0].count, 2);
        assert_eq!(board[0].title, "Docs.rs");
        assert_eq!(board[1].domain, "github.com");
        assert_eq!(board[1].icon, "");
        assert_eq!(board[1].rank, 2);
    }

    #[tokio::test]
    async fn logs_filter_by_query_newest_first() {
        let (_dir, db) = open_temp();
        db.log_web_visit("https://a.com/x", "", 100);
        db.log_web_visit("https://b.com/x", "", 200);
        db.log_web_visit("https://a.com/y", "", 300);
        db.flush().await.unwrap();

        let rows = db.web_logs(Some("a.com".into()), None, None).await.unwrap();
        let urls: Vec<_> = rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(urls, vec!["https://a.com/y", "https://a.com/x"]);
        assert_eq!(rows[0][0].len(), "2024-01-01 00:00:00".len());
    }
}
