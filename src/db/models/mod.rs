pub mod app_event;
pub mod blocklist;
pub mod screen_time;
pub mod web;

pub use app_event::{AppEvent, LeaderboardItem};
pub use blocklist::BlockListExport;
pub use screen_time::ScreenTimeItem;
pub use web::{WebLeaderboardItem, WebMetadata};
