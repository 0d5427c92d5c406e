use crate::db::Database;
use crate::sql_args;

impl Database {
    /// Queues deletion of process events and screen-time records.
    pub fn clear_app_history(&self) {
        self.enqueue("DELETE FROM app_events", sql_args![]);
        self.enqueue("DELETE FROM screen_time", sql_args![]);
    }

    /// Queues deletion of visit logs and the cached page metadata.
    pub fn clear_web_history(&self) {
        self.enqueue("DELETE FROM web_events", sql_args![]);
        self.enqueue("DELETE FROM web_metadata", sql_args![]);
    }
}
