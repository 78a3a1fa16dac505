use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;

use super::filter::RowFilter;
use crate::error::FeedError;

/// A filtered select against one remote table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub table: String,
    pub filter: RowFilter,
    /// Column to sort by, descending
    pub newest_first: Option<String>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, filter: RowFilter) -> Self {
        Self {
            table: table.into(),
            filter,
            newest_first: None,
            limit: None,
        }
    }

    pub fn newest_first(mut self, column: impl Into<String>) -> Self {
        self.newest_first = Some(column.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Row-fetch collaborator: plain filtered selects returning JSON rows.
#[async_trait]
pub trait RowFetcher: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, FeedError>;
}

/// In-memory tables. Used by tests and offline runs.
#[derive(Default)]
pub struct MemoryRows {
    tables: DashMap<String, Vec<Value>>,
    failing: DashSet<String>,
    stalled: DashSet<String>,
}

impl MemoryRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Value) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Make every select on `table` fail.
    pub fn fail_table(&self, table: &str) {
        self.failing.insert(table.to_string());
    }

    /// Make every select on `table` hang forever.
    pub fn stall_table(&self, table: &str) {
        self.stalled.insert(table.to_string());
    }
}

#[async_trait]
impl RowFetcher for MemoryRows {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, FeedError> {
        if self.stalled.contains(&query.table) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&query.table) {
            return Err(FeedError::Backend(format!(
                "select on {} failed",
                query.table
            )));
        }

        let mut rows: Vec<Value> = self
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(column) = &query.newest_first {
            let key = |row: &Value| row.get(column).map(|v| v.to_string()).unwrap_or_default();
            rows.sort_by(|a, b| key(b).cmp(&key(a)));
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let rows = MemoryRows::new();
        rows.insert("scores", json!({ "id": 1, "student_id": "s1", "created_at": "2026-01-01T00:00:00Z" }));
        rows.insert("scores", json!({ "id": 2, "student_id": "s1", "created_at": "2026-01-03T00:00:00Z" }));
        rows.insert("scores", json!({ "id": 3, "student_id": "s2", "created_at": "2026-01-02T00:00:00Z" }));
        rows.insert("scores", json!({ "id": 4, "student_id": "s1", "created_at": "2026-01-02T00:00:00Z" }));

        let query = SelectQuery::new("scores", RowFilter::eq("student_id", "s1"))
            .newest_first("created_at")
            .limit(2);
        let result = rows.select(&query).await.unwrap();

        let ids: Vec<i64> = result.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 4]);
    }

    #[tokio::test]
    async fn test_failing_table() {
        let rows = MemoryRows::new();
        rows.fail_table("lessons");
        let query = SelectQuery::new("lessons", RowFilter::eq("id", "l1"));
        assert!(rows.select(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_table_is_empty() {
        let rows = MemoryRows::new();
        let query = SelectQuery::new("nothing", RowFilter::eq("id", "1"));
        assert!(rows.select(&query).await.unwrap().is_empty());
    }
}
