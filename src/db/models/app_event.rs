//! Process lifecycle records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed process lifetime. `end_time` stays `None` while the process runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppEvent {
    pub id: i64,
    pub process_name: String,
    pub pid: u32,
    pub parent_process_name: Option<String>,
    pub exe_path: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardItem {
    pub rank: u32,
    /// Display name; the process name unless a friendlier one is known.
    pub name: String,
    /// Actual process name, the value the block list matches on.
    pub process_name: String,
    pub count: i64,
}
