use serde::{Deserialize, Serialize};

/// Export document for either block list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockListExport {
    pub exported_at: String,
    pub blocked: Vec<String>,
}
