//! Merged, deduplicated notification feed for the parent role of a school LMS.
//!
//! Live score, attendance and announcement changes are scoped to the
//! parent's children, normalized into a common record and merged into a
//! single newest-first feed whose read flags survive restarts.
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod state;
pub mod utils;

pub use engine::{FeedChange, FeedHandle};
pub use error::FeedError;
pub use models::{NotificationKind, NotificationRecord, Route};
pub use state::AppState;
