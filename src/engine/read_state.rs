use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::KvStore;
use crate::error::FeedError;

/// Durable map from notification id to its read flag.
///
/// The in-memory map is authoritative for the running session. Every
/// mutation writes the whole map back under a single key, so a bulk
/// update costs one write regardless of how many ids it touches.
pub struct ReadStateStore {
    kv: Arc<dyn KvStore>,
    key: String,
    flags: HashMap<String, bool>,
}

impl ReadStateStore {
    /// Load the map stored under `key`.
    ///
    /// A missing or unreadable value starts an empty map; the failure is
    /// logged and the next write replaces the bad value.
    pub async fn load(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let flags = match kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable read-state under {}: {}", key, e);
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                log::warn!("Failed to load read-state under {}: {}", key, e);
                HashMap::new()
            }
        };
        Self { kv, key, flags }
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Mark one id read. Persists even if it already was.
    pub async fn mark_read(&mut self, id: &str) -> Result<(), FeedError> {
        self.flags.insert(id.to_string(), true);
        self.persist().await
    }

    /// Mark every given id read with a single write.
    pub async fn mark_all_read<I>(&mut self, ids: I) -> Result<(), FeedError>
    where
        I: IntoIterator<Item = String>,
    {
        for id in ids {
            self.flags.insert(id, true);
        }
        self.persist().await
    }

    /// Forget a read mark so the id shows as unread again.
    ///
    /// Only writes when something changed. Returns whether it did.
    pub async fn reset(&mut self, id: &str) -> Result<bool, FeedError> {
        if self.flags.remove(id).is_none() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Drop every read mark, in memory and on disk.
    pub async fn clear(&mut self) -> Result<(), FeedError> {
        self.flags.clear();
        self.kv.remove(&self.key).await
    }

    async fn persist(&self) -> Result<(), FeedError> {
        let raw = serde_json::to_string(&self.flags)?;
        self.kv.set(&self.key, &raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKvStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes, fails every operation when `broken` is set.
    #[derive(Default)]
    struct CountingKv {
        inner: MemoryKvStore,
        sets: AtomicUsize,
        broken: bool,
    }

    #[async_trait]
    impl KvStore for CountingKv {
        async fn get(&self, key: &str) -> Result<Option<String>, FeedError> {
            if self.broken {
                return Err(FeedError::Storage("broken".to_string()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), FeedError> {
            if self.broken {
                return Err(FeedError::Storage("broken".to_string()));
            }
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), FeedError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_mark_read_persists_and_reloads() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut store = ReadStateStore::load(kv.clone(), "read_state:p1").await;
        assert!(!store.is_read("a"));

        store.mark_read("a").await.unwrap();
        assert!(store.is_read("a"));

        let reloaded = ReadStateStore::load(kv, "read_state:p1").await;
        assert!(reloaded.is_read("a"));
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_but_still_persists() {
        let kv = Arc::new(CountingKv::default());
        let mut store = ReadStateStore::load(kv.clone(), "k").await;

        store.mark_read("a").await.unwrap();
        store.mark_read("a").await.unwrap();

        assert!(store.is_read("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(kv.sets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mark_all_read_writes_once() {
        let kv = Arc::new(CountingKv::default());
        let mut store = ReadStateStore::load(kv.clone(), "k").await;

        store
            .mark_all_read(vec!["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();

        assert!(store.is_read("a") && store.is_read("b") && store.is_read("c"));
        assert_eq!(kv.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_only_writes_on_change() {
        let kv = Arc::new(CountingKv::default());
        let mut store = ReadStateStore::load(kv.clone(), "k").await;

        assert!(!store.reset("a").await.unwrap());
        assert_eq!(kv.sets.load(Ordering::SeqCst), 0);

        store.mark_read("a").await.unwrap();
        assert!(store.reset("a").await.unwrap());
        assert!(!store.is_read("a"));
        assert_eq!(kv.sets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_key() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut store = ReadStateStore::load(kv.clone(), "k").await;
        store.mark_read("a").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_or_failing_store_starts_empty() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set("k", "not json").await.unwrap();
        let store = ReadStateStore::load(kv, "k").await;
        assert!(store.is_empty());

        let broken = Arc::new(CountingKv {
            broken: true,
            ..Default::default()
        });
        let mut store = ReadStateStore::load(broken, "k").await;
        assert!(store.is_empty());

        // In-memory state still updates when the write fails
        assert!(store.mark_read("a").await.is_err());
        assert!(store.is_read("a"));
    }
}
