use crate::backend::KvStore;
use crate::engine::{spawn_feed, FeedChange, FeedHandle};
use crate::error::FeedError;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Manages feed actors, one per signed-in parent.
///
/// Every actor shares the same key-value store; keys are namespaced by
/// parent id so feeds never see each other's state.
pub struct FeedManager {
    /// Map: parent_id -> FeedHandle
    feeds: Arc<DashMap<String, FeedHandle>>,
    kv: Arc<dyn KvStore>,
    changes: broadcast::Sender<FeedChange>,
}

impl FeedManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            feeds: Arc::new(DashMap::new()),
            kv,
            changes,
        }
    }

    /// Subscribe to change notifications from every managed feed.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<FeedChange> {
        self.changes.subscribe()
    }

    /// Spawn the feed for a parent.
    ///
    /// Fails if one is already running. Returns after persisted state has
    /// been loaded.
    pub async fn spawn_feed(&self, parent_id: &str) -> Result<FeedHandle, FeedError> {
        if self.feeds.contains_key(parent_id) {
            return Err(FeedError::Config(format!(
                "Feed for parent '{}' already exists",
                parent_id
            )));
        }

        let handle = spawn_feed(
            parent_id.to_string(),
            self.kv.clone(),
            Some(self.changes.clone()),
        )
        .await;
        self.feeds.insert(parent_id.to_string(), handle.clone());

        Ok(handle)
    }

    /// Get a handle to an existing feed.
    pub fn get_feed(&self, parent_id: &str) -> Option<FeedHandle> {
        self.feeds.get(parent_id).map(|entry| entry.value().clone())
    }

    /// Shutdown the feed for a parent and forget it.
    pub async fn shutdown_feed(&self, parent_id: &str) -> Result<(), FeedError> {
        let (_, handle) = self
            .feeds
            .remove(parent_id)
            .ok_or_else(|| FeedError::Config(format!("No feed found for parent '{}'", parent_id)))?;

        handle.shutdown().await;
        Ok(())
    }

    /// Shutdown all feeds.
    pub async fn shutdown_all(&self) {
        let parent_ids: Vec<String> = self
            .feeds
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for parent_id in parent_ids {
            // Only fails if removed concurrently, which is the goal anyway
            let _ = self.shutdown_feed(&parent_id).await;
        }
    }

    /// Get the number of running feeds.
    pub fn count(&self) -> usize {
        self.feeds.len()
    }

    pub fn has_feed(&self, parent_id: &str) -> bool {
        self.feeds.contains_key(parent_id)
    }
}
