use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cached page metadata, one row per domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebMetadata {
    pub domain: String,
    pub title: String,
    pub icon_url: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebLeaderboardItem {
    pub rank: u32,
    pub domain: String,
    pub title: String,
    pub icon: String,
    pub count: i64,
}
