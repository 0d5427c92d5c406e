use serde::{Deserialize, Serialize};

/// Foreground time for one executable, summed over a day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenTimeItem {
    pub name: String,
    pub executable_path: String,
    pub duration_seconds: i64,
}
