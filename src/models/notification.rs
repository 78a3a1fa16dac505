use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three sources merged into the feed. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Score,
    Attendance,
    Announcement,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 3] = [
        NotificationKind::Score,
        NotificationKind::Attendance,
        NotificationKind::Announcement,
    ];

    /// Prefix used when deriving notification ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Score => "score",
            NotificationKind::Attendance => "attendance",
            NotificationKind::Announcement => "announcement",
        }
    }

    /// Remote table backing this source.
    pub fn table(&self) -> &'static str {
        match self {
            NotificationKind::Score => "scores",
            NotificationKind::Attendance => "attendance",
            NotificationKind::Announcement => "announcements",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the merged feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique within the feed: `<kind>-<record id>-<suffix millis>`
    pub id: String,
    pub kind: NotificationKind,
    /// Rendered once at normalization time
    pub content: String,
    pub occurred_at: DateTime<Utc>,
    /// Student (or class, for announcements) the record concerns
    #[serde(default)]
    pub subject_entity_id: Option<String>,
    #[serde(default)]
    pub read: bool,
}

/// Downstream screen a notification tap should open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "screen", content = "student_id", rename_all = "snake_case")]
pub enum Route {
    Scores(String),
    Attendance(String),
    Announcements,
}

impl NotificationRecord {
    /// Derive the feed id for a source record.
    pub fn derive_id(kind: NotificationKind, record_id: &str, suffix_millis: i64) -> String {
        format!("{}-{}-{}", kind.as_str(), record_id, suffix_millis)
    }

    /// Where tapping this notification should navigate.
    ///
    /// Score and attendance records without a student fall back to the
    /// announcements list, which every parent can open.
    pub fn route(&self) -> Route {
        match (self.kind, &self.subject_entity_id) {
            (NotificationKind::Score, Some(student)) => Route::Scores(student.clone()),
            (NotificationKind::Attendance, Some(student)) => Route::Attendance(student.clone()),
            _ => Route::Announcements,
        }
    }
}
