/// Utility modules for the notification feed
pub mod time;

pub use time::{format_utc, now_utc, parse_timestamp, relative_time};
