//! Turns typed source events into feed records.
//!
//! Pure: everything that needs I/O (student and lesson names) is resolved
//! beforehand into a `Lookup`. Missing lookups render as placeholders.

use chrono::{DateTime, Utc};

use crate::models::{ChangeType, LessonInfo, NotificationRecord, SourceEvent};
use crate::utils::relative_time;

pub const UNKNOWN_STUDENT: &str = "Your child";
pub const UNKNOWN_SUBJECT: &str = "Unknown Subject";
pub const UNKNOWN_LESSON: &str = "Unknown Lesson";

/// Side-lookup data needed to render one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    pub student_name: Option<String>,
    pub lesson: LessonInfo,
}

impl Lookup {
    fn student(&self) -> &str {
        self.student_name.as_deref().unwrap_or(UNKNOWN_STUDENT)
    }

    fn subject(&self) -> &str {
        self.lesson.subject.as_deref().unwrap_or(UNKNOWN_SUBJECT)
    }

    fn lesson(&self) -> &str {
        self.lesson.title.as_deref().unwrap_or(UNKNOWN_LESSON)
    }
}

/// Normalize a source event, live or fetched during a refresh.
///
/// Inserts are keyed and stamped by the row's own creation time (falling
/// back to `now`), so a row delivered live and fetched again by a refresh
/// lands on the same id. Updates are keyed and stamped `now`: every edit
/// surfaces as a fresh entry at the top. The result is always unread.
pub fn normalize(event: &SourceEvent, lookup: &Lookup, now: DateTime<Utc>) -> NotificationRecord {
    let occurred_at = match event.change() {
        ChangeType::Update => now,
        _ => created_at(event).unwrap_or(now),
    };
    build(event, lookup, occurred_at.timestamp_millis(), occurred_at, now)
}

fn created_at(event: &SourceEvent) -> Option<DateTime<Utc>> {
    match event {
        SourceEvent::Score { row, .. } => row.created_at,
        SourceEvent::Attendance { row, .. } => row.created_at,
        SourceEvent::Announcement { row, .. } => row.created_at,
    }
}

fn build(
    event: &SourceEvent,
    lookup: &Lookup,
    suffix_millis: i64,
    occurred_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> NotificationRecord {
    let (content, subject_entity_id) = match event {
        SourceEvent::Score { row, .. } => (
            format!(
                "{} received a score of {} in {} ({})",
                lookup.student(),
                row.score,
                lookup.subject(),
                lookup.lesson()
            ),
            row.student_id.clone(),
        ),
        SourceEvent::Attendance { row, .. } => (
            format!(
                "{} was marked {} in {} ({})",
                lookup.student(),
                row.status,
                lookup.subject(),
                lookup.lesson()
            ),
            row.student_id.clone(),
        ),
        SourceEvent::Announcement { row, .. } => (
            format!(
                "{}: {} ({})",
                row.title,
                row.content,
                relative_time(row.created_at.unwrap_or(now), now)
            ),
            row.class_id.clone(),
        ),
    };

    NotificationRecord {
        id: NotificationRecord::derive_id(event.kind(), event.record_id(), suffix_millis),
        kind: event.kind(),
        content,
        occurred_at,
        subject_entity_id,
        read: false,
    }
}
