//! REST row-fetch adapter for the hosted Postgres backend.

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use super::rows::{RowFetcher, SelectQuery};
use crate::error::FeedError;

/// Row fetcher talking to the backend's REST endpoint (`/rest/v1/<table>`).
pub struct PostgrestClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl PostgrestClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, FeedError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FeedError::Config(format!("invalid backend url '{}': {}", base_url, e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            access_token,
        })
    }

    /// Build the request URL for a select.
    pub fn request_url(&self, query: &SelectQuery) -> Result<Url, FeedError> {
        let path = format!("rest/v1/{}", query.table);
        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| FeedError::Config(format!("invalid table path '{}': {}", path, e)))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            let (column, op) = query.filter.query_pair();
            pairs.append_pair(&column, &op);
            if let Some(order) = &query.newest_first {
                pairs.append_pair("order", &format!("{}.desc", order));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}

#[async_trait]
impl RowFetcher for PostgrestClient {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, FeedError> {
        let url = self.request_url(query)?;
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Backend(format!(
                "select on {} returned {}: {}",
                query.table, status, body
            )));
        }

        Ok(response.json::<Vec<Value>>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::filter::RowFilter;

    #[test]
    fn test_request_url() {
        let client = PostgrestClient::new("https://school.example.co", "anon", None).unwrap();
        let query = SelectQuery::new("scores", RowFilter::any_of("student_id", ["s1", "s2"]))
            .newest_first("created_at")
            .limit(20);

        let url = client.request_url(&query).unwrap();
        assert_eq!(url.path(), "/rest/v1/scores");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("select".to_string(), "*".to_string()),
                ("student_id".to_string(), "in.(s1,s2)".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_bearer_prefers_access_token() {
        let anon = PostgrestClient::new("https://x.example", "anon", None).unwrap();
        assert_eq!(anon.bearer(), "anon");

        let user =
            PostgrestClient::new("https://x.example", "anon", Some("jwt".to_string())).unwrap();
        assert_eq!(user.bearer(), "jwt");
    }

    #[test]
    fn test_invalid_base_url() {
        let result = PostgrestClient::new("not a url", "anon", None);
        assert!(matches!(result, Err(FeedError::Config(_))));
    }
}
