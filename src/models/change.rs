use serde::{Deserialize, Serialize};

use super::rows::{AnnouncementRow, AttendanceRow, ScoreRow};
use super::NotificationKind;
use crate::error::FeedError;

/// Change types delivered by the realtime transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A change exactly as the transport pushes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    pub event_type: ChangeType,
    #[serde(default)]
    pub new_row: Option<serde_json::Value>,
    #[serde(default)]
    pub old_row: Option<serde_json::Value>,
}

impl RawChange {
    pub fn insert(row: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Insert,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn update(row: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Update,
            new_row: Some(row),
            old_row: None,
        }
    }

    pub fn delete(old: serde_json::Value) -> Self {
        Self {
            event_type: ChangeType::Delete,
            new_row: None,
            old_row: Some(old),
        }
    }
}

/// A typed insert/update from one of the three sources.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Score { change: ChangeType, row: ScoreRow },
    Attendance { change: ChangeType, row: AttendanceRow },
    Announcement { change: ChangeType, row: AnnouncementRow },
}

impl SourceEvent {
    /// Type a raw change for the given source.
    ///
    /// Returns `Ok(None)` for deletes, which never produce a notification.
    /// A missing or unparseable row is a `MalformedPayload`.
    pub fn parse(kind: NotificationKind, raw: &RawChange) -> Result<Option<Self>, FeedError> {
        let change = raw.event_type;
        if change == ChangeType::Delete {
            return Ok(None);
        }
        let row = raw.new_row.clone().ok_or_else(|| {
            FeedError::MalformedPayload(format!("{} {:?} without a row", kind, change))
        })?;
        Self::from_row(kind, change, row).map(Some)
    }

    /// Type a row fetched outside the change feed (reconciliation refresh).
    pub fn from_row(
        kind: NotificationKind,
        change: ChangeType,
        row: serde_json::Value,
    ) -> Result<Self, FeedError> {
        let malformed = |e: serde_json::Error| FeedError::MalformedPayload(format!("{}: {}", kind, e));
        Ok(match kind {
            NotificationKind::Score => SourceEvent::Score {
                change,
                row: serde_json::from_value(row).map_err(malformed)?,
            },
            NotificationKind::Attendance => SourceEvent::Attendance {
                change,
                row: serde_json::from_value(row).map_err(malformed)?,
            },
            NotificationKind::Announcement => SourceEvent::Announcement {
                change,
                row: serde_json::from_value(row).map_err(malformed)?,
            },
        })
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            SourceEvent::Score { .. } => NotificationKind::Score,
            SourceEvent::Attendance { .. } => NotificationKind::Attendance,
            SourceEvent::Announcement { .. } => NotificationKind::Announcement,
        }
    }

    pub fn change(&self) -> ChangeType {
        match self {
            SourceEvent::Score { change, .. }
            | SourceEvent::Attendance { change, .. }
            | SourceEvent::Announcement { change, .. } => *change,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            SourceEvent::Score { row, .. } => &row.id,
            SourceEvent::Attendance { row, .. } => &row.id,
            SourceEvent::Announcement { row, .. } => &row.id,
        }
    }

    /// Student the event concerns, if any.
    pub fn student_id(&self) -> Option<&str> {
        match self {
            SourceEvent::Score { row, .. } => row.student_id.as_deref(),
            SourceEvent::Attendance { row, .. } => row.student_id.as_deref(),
            SourceEvent::Announcement { .. } => None,
        }
    }

    /// Lesson to join for subject/lesson names, if any.
    pub fn lesson_id(&self) -> Option<&str> {
        match self {
            SourceEvent::Score { row, .. } => row.lesson_id.as_deref(),
            SourceEvent::Attendance { row, .. } => row.lesson_id.as_deref(),
            SourceEvent::Announcement { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_insert() {
        let raw = RawChange::insert(json!({
            "id": 1, "student_id": "s1", "lesson_id": "l1", "score": 9
        }));
        let event = SourceEvent::parse(NotificationKind::Score, &raw)
            .unwrap()
            .expect("insert should produce an event");

        assert_eq!(event.kind(), NotificationKind::Score);
        assert_eq!(event.change(), ChangeType::Insert);
        assert_eq!(event.record_id(), "1");
        assert_eq!(event.student_id(), Some("s1"));
        assert_eq!(event.lesson_id(), Some("l1"));
    }

    #[test]
    fn test_parse_delete_is_none() {
        let raw = RawChange::delete(json!({ "id": 1 }));
        assert!(SourceEvent::parse(NotificationKind::Attendance, &raw)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_missing_row_is_malformed() {
        let raw = RawChange {
            event_type: ChangeType::Update,
            new_row: None,
            old_row: None,
        };
        let err = SourceEvent::parse(NotificationKind::Score, &raw).unwrap_err();
        assert!(matches!(err, FeedError::MalformedPayload(_)));
    }

    #[test]
    fn test_parse_wrong_shape_is_malformed() {
        let raw = RawChange::insert(json!({ "id": "x", "content": "no title" }));
        let err = SourceEvent::parse(NotificationKind::Announcement, &raw).unwrap_err();
        assert!(matches!(err, FeedError::MalformedPayload(_)));
    }

    #[test]
    fn test_change_type_wire_format() {
        let raw: RawChange = serde_json::from_value(json!({
            "event_type": "UPDATE",
            "new_row": { "id": 1 }
        }))
        .unwrap();
        assert_eq!(raw.event_type, ChangeType::Update);
        assert!(raw.old_row.is_none());
    }
}
