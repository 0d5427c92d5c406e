pub mod logging;
pub mod time;

pub use time::{parse_bound, parse_time, parse_time_at};
