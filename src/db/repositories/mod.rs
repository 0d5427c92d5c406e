pub mod app_events;
pub mod blocklists;
pub mod history;
pub mod screen_time;
pub mod web_logs;

pub use blocklists::BlockListKind;
