//! Row filter expressions in the backend's query syntax.
//!
//! Only the two operators the feed needs are supported:
//! `column=eq.value` and `column=in.(a,b,c)`. The same expression is used
//! to scope realtime subscriptions and REST selects.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    Eq { column: String, value: String },
    In { column: String, values: Vec<String> },
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        RowFilter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RowFilter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            RowFilter::Eq { column, .. } | RowFilter::In { column, .. } => column,
        }
    }

    /// Whether a JSON row satisfies the filter.
    ///
    /// Numbers and strings compare by their textual form so that a numeric
    /// `student_id` column matches the string ids the feed carries.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = match row.get(self.column()).and_then(cell_text) {
            Some(cell) => cell,
            None => return false,
        };
        match self {
            RowFilter::Eq { value, .. } => &cell == value,
            RowFilter::In { values, .. } => values.iter().any(|v| v == &cell),
        }
    }

    /// Query-string pair for a REST select: (`column`, `eq.value`).
    pub fn query_pair(&self) -> (String, String) {
        match self {
            RowFilter::Eq { column, value } => (column.clone(), format!("eq.{}", value)),
            RowFilter::In { column, values } => {
                (column.clone(), format!("in.({})", values.join(",")))
            }
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (column, op) = self.query_pair();
        write!(f, "{}={}", column, op)
    }
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
