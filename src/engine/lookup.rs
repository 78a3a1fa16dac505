//! Authorized scope and side-lookups.
//!
//! The scope is the set of children a parent may observe; it drives the
//! subscription filters. Side-lookups resolve the names a notification
//! needs. A failed lookup never fails the event: the missing name falls
//! back to a placeholder in the normalizer.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::backend::{RowFetcher, RowFilter, SelectQuery};
use crate::engine::normalizer::Lookup;
use crate::error::FeedError;
use crate::models::rows::{LessonRow, SubjectRow, LESSONS_TABLE, STUDENTS_TABLE, SUBJECTS_TABLE};
use crate::models::{ChildRef, LessonInfo, NotificationKind, SourceEvent};

/// Children a parent is authorized to observe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthorizedScope {
    pub parent_id: String,
    pub children: Vec<ChildRef>,
}

impl AuthorizedScope {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn student_ids(&self) -> Vec<String> {
        self.children.iter().map(|c| c.id.clone()).collect()
    }

    /// Distinct classes of the children, sorted.
    pub fn class_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .children
            .iter()
            .filter_map(|c| c.class_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn student_name(&self, student_id: &str) -> Option<String> {
        self.children
            .iter()
            .find(|c| c.id == student_id)
            .and_then(|c| c.name.clone())
    }

    /// Filter scoping one source to this parent.
    ///
    /// Scores and attendance are per student; announcements are per class.
    /// `None` when there is nothing to scope to (children without classes).
    pub fn filter_for(&self, kind: NotificationKind) -> Option<RowFilter> {
        let (column, values) = match kind {
            NotificationKind::Score | NotificationKind::Attendance => {
                ("student_id", self.student_ids())
            }
            NotificationKind::Announcement => ("class_id", self.class_ids()),
        };
        if values.is_empty() {
            None
        } else {
            Some(RowFilter::any_of(column, values))
        }
    }
}

/// Resolve the children linked to `parent_id`.
///
/// Rows that do not parse as a child are skipped.
pub async fn resolve_scope(
    rows: &dyn RowFetcher,
    parent_id: &str,
) -> Result<AuthorizedScope, FeedError> {
    let query = SelectQuery::new(STUDENTS_TABLE, RowFilter::eq("parent_id", parent_id));
    let children = rows
        .select(&query)
        .await
        .map_err(|e| FeedError::ScopeResolution(e.to_string()))?
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<ChildRef>(row) {
            Ok(child) => Some(child),
            Err(e) => {
                log::warn!("Skipping malformed student row for {}: {}", parent_id, e);
                None
            }
        })
        .collect();

    Ok(AuthorizedScope {
        parent_id: parent_id.to_string(),
        children,
    })
}

/// Resolves render data for events, caching lesson joins.
pub struct Lookups {
    rows: Arc<dyn RowFetcher>,
    scope: Arc<AuthorizedScope>,
    lessons: DashMap<String, LessonInfo>,
}

impl Lookups {
    pub fn new(rows: Arc<dyn RowFetcher>, scope: Arc<AuthorizedScope>) -> Self {
        Self {
            rows,
            scope,
            lessons: DashMap::new(),
        }
    }

    pub fn scope(&self) -> &AuthorizedScope {
        &self.scope
    }

    pub fn rows(&self) -> &dyn RowFetcher {
        self.rows.as_ref()
    }

    pub async fn resolve(&self, event: &SourceEvent) -> Lookup {
        let student_name = event
            .student_id()
            .and_then(|id| self.scope.student_name(id));
        let lesson = match event.lesson_id() {
            Some(id) => self.lesson(id).await,
            None => LessonInfo::default(),
        };
        Lookup {
            student_name,
            lesson,
        }
    }

    /// Lesson title and subject name. Only complete lookups are cached,
    /// so a transient failure is retried on the next event.
    async fn lesson(&self, lesson_id: &str) -> LessonInfo {
        if let Some(hit) = self.lessons.get(lesson_id) {
            return hit.value().clone();
        }

        match self.fetch_lesson(lesson_id).await {
            Ok(info) => {
                if info.title.is_some() && info.subject.is_some() {
                    self.lessons.insert(lesson_id.to_string(), info.clone());
                }
                info
            }
            Err(e) => {
                log::warn!("Lesson lookup for {} failed: {}", lesson_id, e);
                LessonInfo::default()
            }
        }
    }

    async fn fetch_lesson(&self, lesson_id: &str) -> Result<LessonInfo, FeedError> {
        let lesson: Option<LessonRow> =
            first_row(self.rows.as_ref(), LESSONS_TABLE, lesson_id).await?;
        let lesson = match lesson {
            Some(lesson) => lesson,
            None => return Ok(LessonInfo::default()),
        };

        let subject = match &lesson.subject_id {
            Some(subject_id) => {
                let subject: Option<SubjectRow> =
                    first_row(self.rows.as_ref(), SUBJECTS_TABLE, subject_id).await?;
                subject.map(|s| s.name)
            }
            None => None,
        };

        Ok(LessonInfo {
            title: lesson.title,
            subject,
        })
    }
}

async fn first_row<T: serde::de::DeserializeOwned>(
    rows: &dyn RowFetcher,
    table: &str,
    id: &str,
) -> Result<Option<T>, FeedError> {
    let query = SelectQuery::new(table, RowFilter::eq("id", id)).limit(1);
    match rows.select(&query).await?.into_iter().next() {
        Some(row) => parse_row(table, row).map(Some),
        None => Ok(None),
    }
}

fn parse_row<T: serde::de::DeserializeOwned>(table: &str, row: Value) -> Result<T, FeedError> {
    serde_json::from_value(row)
        .map_err(|e| FeedError::MalformedPayload(format!("{} row: {}", table, e)))
}
