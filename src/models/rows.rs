//! Typed views of the backend rows the feed reads.
//!
//! The backend hands rows over as JSON. Ids may arrive as numbers or
//! strings depending on the column type, so they are normalized to
//! strings here. Timestamps that fail to parse become `None` instead of
//! failing the whole row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::utils::time::parse_timestamp;

pub const STUDENTS_TABLE: &str = "students";
pub const LESSONS_TABLE: &str = "lessons";
pub const SUBJECTS_TABLE: &str = "subjects";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoreRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub lesson_id: Option<String>,
    pub score: Grade,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttendanceRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub lesson_id: Option<String>,
    pub status: String,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnouncementRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub class_id: Option<String>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A child the signed-in parent may observe.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChildRef {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LessonRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub subject_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub name: String,
}

/// Joined lesson/subject names used to render score and attendance text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LessonInfo {
    pub title: Option<String>,
    pub subject: Option<String>,
}

/// A score as stored: numeric marks or letter grades.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Grade {
    Number(f64),
    Text(String),
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Number(n) if n.fract() == 0.0 => write!(f, "{}", *n as i64),
            Grade::Number(n) => write!(f, "{}", n),
            Grade::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Str(String),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Int(n) => n.to_string(),
            RawId::Str(s) => s,
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Option::<RawId>::deserialize(d).map(|id| id.map(String::from))
}

fn de_opt_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_row_accepts_numeric_ids() {
        let row: ScoreRow = serde_json::from_value(json!({
            "id": 12,
            "student_id": 3,
            "lesson_id": "l-9",
            "score": 95,
            "created_at": "2026-03-01T08:00:00+00:00"
        }))
        .unwrap();

        assert_eq!(row.id, "12");
        assert_eq!(row.student_id.as_deref(), Some("3"));
        assert_eq!(row.lesson_id.as_deref(), Some("l-9"));
        assert_eq!(row.score.to_string(), "95");
        assert!(row.created_at.is_some());
    }

    #[test]
    fn test_bad_timestamp_does_not_fail_row() {
        let row: AttendanceRow = serde_json::from_value(json!({
            "id": "a1",
            "status": "absent",
            "created_at": "yesterday-ish"
        }))
        .unwrap();

        assert_eq!(row.created_at, None);
        assert_eq!(row.student_id, None);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let result: Result<ScoreRow, _> = serde_json::from_value(json!({ "id": 1 }));
        assert!(result.is_err());
    }

    #[test]
    fn test_grade_display() {
        assert_eq!(Grade::Number(8.5).to_string(), "8.5");
        assert_eq!(Grade::Number(10.0).to_string(), "10");
        assert_eq!(Grade::Text("A-".to_string()).to_string(), "A-");
    }
}
