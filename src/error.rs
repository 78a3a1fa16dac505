//! Error types for the parent notification feed

use thiserror::Error;

use crate::models::NotificationKind;

/// Errors raised by the feed core and its backend adapters.
///
/// Most of these are recovered close to where they happen (per event or
/// per source) and only show up in logs. `clear_all_data` is the one
/// operation that hands them back to the caller.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("subscription to {kind} failed: {message}")]
    Subscription {
        kind: NotificationKind,
        message: String,
    },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("could not resolve authorized children: {0}")]
    ScopeResolution(String),

    #[error("feed actor has shut down")]
    ActorUnavailable,

    #[error("config error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for FeedError {
    fn from(e: sqlx::Error) -> Self {
        FeedError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        FeedError::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            FeedError::Storage("disk full".to_string()).to_string(),
            "storage error: disk full"
        );
        assert_eq!(
            FeedError::Subscription {
                kind: NotificationKind::Attendance,
                message: "channel closed".to_string(),
            }
            .to_string(),
            "subscription to attendance failed: channel closed"
        );
        assert_eq!(
            FeedError::ActorUnavailable.to_string(),
            "feed actor has shut down"
        );
    }
}
