use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use serde::Deserialize;

use crate::db::{models::BlockListExport, Database};
use crate::sql_args;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockListKind {
    Apps,
    Web,
}

impl BlockListKind {
    fn table(self) -> &'static str {
        match self {
            BlockListKind::Apps => "app_blocklist",
            BlockListKind::Web => "web_blocklist",
        }
    }

    fn column(self) -> &'static str {
        match self {
            BlockListKind::Apps => "name",
            BlockListKind::Web => "domain",
        }
    }

    pub fn normalize(self, raw: &str) -> Option<String> {
        match self {
            BlockListKind::Apps => normalize_app_name(raw),
            BlockListKind::Web => normalize_domain(raw),
        }
    }
}

pub fn normalize_app_name(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase();
    (!name.is_empty()).then_some(name)
}

/// Reduces a URL or host to the bare lowercase domain the extension matches on.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut host = raw.trim().to_lowercase();

    if let Some(idx) = host.find("://") {
        host = host[idx + 3..].to_string();
    }
    if let Some(idx) = host.find(|c: char| matches!(c, '/' | '?' | '#')) {
        host.truncate(idx);
    }
    if let Some(idx) = host.rfind('@') {
        host = host[idx + 1..].to_string();
    }
    if host.starts_with('[') {
        // IPv6 literal: only a port after the closing bracket is stripped.
        if let Some(idx) = host.find(']') {
            host.truncate(idx + 1);
        }
    } else if let Some(idx) = host.find(':') {
        host.truncate(idx);
    }

    let host = host.trim_end_matches('.');
    let host = host.strip_prefix("www.").unwrap_or(host);
    (!host.is_empty()).then(|| host.to_string())
}

fn insert_sql(kind: BlockListKind) -> String {
    format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES (?1)",
        kind.table(),
        kind.column()
    )
}

fn normalize_distinct<S: AsRef<str>>(kind: BlockListKind, entries: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter_map(|entry| kind.normalize(entry.as_ref()))
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}

#[derive(Deserialize)]
struct SavedBlockList {
    blocked: Vec<String>,
}

/// Accepts an export document or a bare JSON array of entries.
pub fn parse_import(content: &str) -> Result<Vec<String>> {
    if let Ok(entries) = serde_json::from_str::<Vec<String>>(content) {
        return Ok(entries);
    }
    serde_json::from_str::<SavedBlockList>(content)
        .map(|saved| saved.blocked)
        .map_err(|_| anyhow!("invalid JSON format in uploaded file"))
}

pub fn render_export(blocked: Vec<String>) -> Result<String> {
    let export = BlockListExport {
        exported_at: Local::now().to_rfc3339(),
        blocked,
    };
    serde_json::to_string_pretty(&export).context("failed to serialize block list export")
}

impl Database {
    pub async fn load_blocklist(&self, kind: BlockListKind) -> Result<Vec<String>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {col} FROM {table} ORDER BY {col}",
                col = kind.column(),
                table = kind.table()
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    pub async fn load_app_blocklist(&self) -> Result<Vec<String>> {
        self.load_blocklist(BlockListKind::Apps).await
    }

    pub async fn load_web_blocklist(&self) -> Result<Vec<String>> {
        self.load_blocklist(BlockListKind::Web).await
    }

    /// Queues set-insertion of every entry; returns the distinct normalized entries.
    pub fn add_to_blocklist<S: AsRef<str>>(&self, kind: BlockListKind, entries: &[S]) -> Vec<String> {
        let sql = insert_sql(kind);
        let normalized = normalize_distinct(kind, entries);
        for entry in &normalized {
            self.enqueue(sql.clone(), sql_args![entry.clone()]);
        }
        normalized
    }

    /// Inserts entries in one transaction and returns those that were not stored yet.
    pub async fn insert_into_blocklist<S: AsRef<str>>(
        &self,
        kind: BlockListKind,
        entries: &[S],
    ) -> Result<Vec<String>> {
        let sql = insert_sql(kind);
        let normalized = normalize_distinct(kind, entries);
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut added = Vec::new();
            {
                let mut stmt = tx.prepare(&sql)?;
                for entry in normalized {
                    if stmt.execute([entry.as_str()])? > 0 {
                        added.push(entry);
                    }
                }
            }
            tx.commit()?;
            Ok(added)
        })
        .await
    }

    pub fn remove_from_blocklist<S: AsRef<str>>(&self, kind: BlockListKind, entries: &[S]) {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", kind.table(), kind.column());
        for entry in entries.iter().filter_map(|e| kind.normalize(e.as_ref())) {
            self.enqueue(sql.clone(), sql_args![entry]);
        }
    }

    pub fn clear_blocklist(&self, kind: BlockListKind) {
        self.enqueue(format!("DELETE FROM {}", kind.table()), sql_args![]);
    }

    pub async fn export_blocklist(&self, kind: BlockListKind) -> Result<String> {
        let entries = self.load_blocklist(kind).await?;
        render_export(entries)
    }

    /// Merges an uploaded list into the current one; returns how many entries were new.
    pub async fn import_blocklist(&self, kind: BlockListKind, content: &str) -> Result<usize> {
        let entries = parse_import(content)?;
        Ok(self.insert_into_blocklist(kind, &entries).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::open_temp;

    #[test]
    fn domains_are_normalized() {
        assert_eq!(
            normalize_domain("https://WWW.Example.com:443/path?q=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(normalize_domain("news.site.org.").as_deref(), Some("news.site.org"));
        assert_eq!(normalize_domain("user@host.net/x").as_deref(), Some("host.net"));
        assert_eq!(normalize_domain("   "), None);
    }

    #[test]
    fn ipv6_hosts_keep_their_address() {
        assert_eq!(normalize_domain("http://[::1]:8080/admin").as_deref(), Some("[::1]"));
        assert_eq!(normalize_domain("[fe80::1]").as_deref(), Some("[fe80::1]"));
        assert_eq!(normalize_domain("localhost:3000").as_deref(), Some("localhost"));
    }

    #[test]
    fn import_accepts_both_document_shapes() {
        assert_eq!(parse_import(r#"["a.exe","b.exe"]"#).unwrap(), vec!["a.exe", "b.exe"]);
        assert_eq!(
            parse_import(r#"{"exported_at":"2024-01-01T00:00:00Z","blocked":["c.exe"]}"#).unwrap(),
            vec!["c.exe"]
        );
        let err = parse_import("{not json").unwrap_err();
        assert_eq!(err.to_string(), "invalid JSON format in uploaded file");
    }

    #[tokio::test]
    async fn import_is_idempotent() {
        let (_dir, db) = open_temp();
        let content = r#"["Game.exe", "game.exe", "steam.exe"]"#;

        assert_eq!(db.import_blocklist(BlockListKind::Apps, content).await.unwrap(), 2);
        let once = db.load_app_blocklist().await.unwrap();
        assert_eq!(db.import_blocklist(BlockListKind::Apps, content).await.unwrap(), 0);
        let twice = db.load_app_blocklist().await.unwrap();

        assert_eq!(once, vec!["game.exe", "steam.exe"]);
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn export_round_trips_through_import() {
        let (_dir, db) = open_temp();
        db.add_to_blocklist(BlockListKind::Web, &["https://www.reddit.com/r/rust", "x.com"]);
        db.flush().await.unwrap();

        let exported = db.export_blocklist(BlockListKind::Web).await.unwrap();
        let doc: BlockListExport = serde_json::from_str(&exported).unwrap();
        assert_eq!(doc.blocked, vec!["reddit.com", "x.com"]);

        db.clear_blocklist(BlockListKind::Web);
        db.flush().await.unwrap();
        assert!(db.load_web_blocklist().await.unwrap().is_empty());

        db.import_blocklist(BlockListKind::Web, &exported).await.unwrap();
        assert_eq!(db.load_web_blocklist().await.unwrap(), vec!["reddit.com", "x.com"]);
    }

    #[tokio::test]
    async fn removal_is_explicit() {
        let (_dir, db) = open_temp();
        db.add_to_blocklist(BlockListKind::Apps, &["a.exe", "b.exe"]);
        db.remove_from_blocklist(BlockListKind::Apps, &["A.EXE"]);
        db.flush().await.unwrap();
        assert_eq!(db.load_app_blocklist().await.unwrap(), vec!["b.exe"]);
    }
}
