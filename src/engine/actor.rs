use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::backend::KvStore;
use crate::engine::feed::Feed;
use crate::engine::read_state::ReadStateStore;
use crate::error::FeedError;
use crate::models::NotificationRecord;

/// KV key holding a parent's read flags.
pub fn read_state_key(parent_id: &str) -> String {
    format!("read_state:{}", parent_id)
}

/// KV key holding a parent's last feed snapshot.
pub fn snapshot_key(parent_id: &str) -> String {
    format!("feed_snapshot:{}", parent_id)
}

/// Messages that can be sent to the feed actor.
#[derive(Debug)]
pub enum FeedMessage {
    /// Merge one freshly normalized record
    AddNotification {
        record: NotificationRecord,
        response: oneshot::Sender<()>,
    },
    /// Reconcile a batch from a source-of-truth fetch
    BulkAdd {
        records: Vec<NotificationRecord>,
        response: oneshot::Sender<usize>,
    },
    /// Mark one notification read
    MarkRead {
        id: String,
        response: oneshot::Sender<bool>,
    },
    /// Mark every notification in the feed read
    MarkAllRead { response: oneshot::Sender<()> },
    /// Drop the feed and all read flags
    Clear {
        response: oneshot::Sender<Result<(), FeedError>>,
    },
    /// Get the ordered feed
    GetFeed {
        response: oneshot::Sender<Vec<NotificationRecord>>,
    },
    /// Get the number of unread notifications
    GetUnreadCount { response: oneshot::Sender<usize> },
    /// Shutdown the actor
    Shutdown,
}

/// Published after every mutation so views can re-render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedChange {
    pub parent_id: String,
    pub len: usize,
    pub unread_count: usize,
}

/// Single writer for one parent's feed.
///
/// Messages are handled one at a time and each merge, including its
/// re-sort and persistence, finishes before the next message is read.
pub struct FeedActor {
    parent_id: String,
    feed: Feed,
    read_state: ReadStateStore,
    kv: Arc<dyn KvStore>,
    mailbox: mpsc::UnboundedReceiver<FeedMessage>,
    changes: Option<broadcast::Sender<FeedChange>>,
}

impl FeedActor {
    /// Create the actor and load persisted state.
    ///
    /// Loading completes before the actor exists, so no event can be
    /// merged ahead of the cold-start snapshot.
    pub async fn new(
        parent_id: String,
        kv: Arc<dyn KvStore>,
        mailbox: mpsc::UnboundedReceiver<FeedMessage>,
        changes: Option<broadcast::Sender<FeedChange>>,
    ) -> Self {
        let read_state = ReadStateStore::load(kv.clone(), read_state_key(&parent_id)).await;
        let mut feed = Feed::from_records(load_snapshot(kv.as_ref(), &parent_id).await);
        feed.annotate(|id| read_state.is_read(id));

        log::debug!(
            "Feed for {} loaded: {} records, {} unread",
            parent_id,
            feed.len(),
            feed.unread_count()
        );

        Self {
            parent_id,
            feed,
            read_state,
            kv,
            mailbox,
            changes,
        }
    }

    /// Run the actor's main loop.
    ///
    /// Exits on `Shutdown` or when every handle has been dropped.
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                FeedMessage::AddNotification { record, response } => {
                    self.add_notification(record).await;
                    let _ = response.send(());
                }
                FeedMessage::BulkAdd { records, response } => {
                    let added = self.bulk_add(records).await;
                    let _ = response.send(added);
                }
                FeedMessage::MarkRead { id, response } => {
                    let found = self.mark_read(&id).await;
                    let _ = response.send(found);
                }
                FeedMessage::MarkAllRead { response } => {
                    self.mark_all_read().await;
                    let _ = response.send(());
                }
                FeedMessage::Clear { response } => {
                    let result = self.clear().await;
                    let _ = response.send(result);
                }
                FeedMessage::GetFeed { response } => {
                    let _ = response.send(self.feed.records().to_vec());
                }
                FeedMessage::GetUnreadCount { response } => {
                    let _ = response.send(self.feed.unread_count());
                }
                FeedMessage::Shutdown => {
                    break;
                }
            }
        }
        log::debug!("Feed actor for {} stopped", self.parent_id);
    }

    async fn add_notification(&mut self, record: NotificationRecord) {
        // A re-delivered id that was read before comes back unread
        if !record.read {
            if let Err(e) = self.read_state.reset(&record.id).await {
                log::warn!("Failed to persist read-state for {}: {}", record.id, e);
            }
        }
        self.feed.add(record);
        self.after_merge().await;
    }

    async fn bulk_add(&mut self, records: Vec<NotificationRecord>) -> usize {
        let read_state = &self.read_state;
        let added = self.feed.bulk_add(records, |id| read_state.is_read(id));
        self.after_merge().await;
        added
    }

    async fn mark_read(&mut self, id: &str) -> bool {
        let found = self.feed.mark_read(id);
        if let Err(e) = self.read_state.mark_read(id).await {
            log::warn!("Failed to persist read mark for {}: {}", id, e);
        }
        self.publish();
        found
    }

    async fn mark_all_read(&mut self) {
        let ids: Vec<String> = self.feed.ids().map(str::to_string).collect();
        self.feed.mark_all_read();
        if let Err(e) = self.read_state.mark_all_read(ids).await {
            log::warn!("Failed to persist read marks for {}: {}", self.parent_id, e);
        }
        self.publish();
    }

    async fn clear(&mut self) -> Result<(), FeedError> {
        self.feed.clear();
        let read_state = self.read_state.clear().await;
        let snapshot = self.kv.remove(&snapshot_key(&self.parent_id)).await;
        self.publish();
        read_state.and(snapshot)
    }

    async fn after_merge(&mut self) {
        if let Err(e) = self.save_snapshot().await {
            log::warn!("Failed to save feed snapshot for {}: {}", self.parent_id, e);
        }
        self.publish();
    }

    /// Read flags inside the snapshot are not authoritative: read marks
    /// only write the read-state key, and `new` re-annotates every loaded
    /// record from it.
    async fn save_snapshot(&self) -> Result<(), FeedError> {
        let raw = serde_json::to_string(self.feed.records())?;
        self.kv.set(&snapshot_key(&self.parent_id), &raw).await
    }

    fn publish(&self) {
        if let Some(tx) = &self.changes {
            // No receivers is fine
            let _ = tx.send(FeedChange {
                parent_id: self.parent_id.clone(),
                len: self.feed.len(),
                unread_count: self.feed.unread_count(),
            });
        }
    }
}

async fn load_snapshot(kv: &dyn KvStore, parent_id: &str) -> Vec<NotificationRecord> {
    let key = snapshot_key(parent_id);
    match kv.get(&key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("Discarding unreadable feed snapshot under {}: {}", key, e);
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            log::warn!("Failed to load feed snapshot under {}: {}", key, e);
            Vec::new()
        }
    }
}

/// Handle for interacting with a feed actor.
///
/// Cheap to clone; every consumer gets its own copy while the actor
/// stays the only writer.
#[derive(Clone, Debug)]
pub struct FeedHandle {
    sender: mpsc::UnboundedSender<FeedMessage>,
}

impl FeedHandle {
    /// Create a new handle with the given sender.
    pub fn new(sender: mpsc::UnboundedSender<FeedMessage>) -> Self {
        Self { sender }
    }

    /// Merge one record into the feed.
    pub async fn add_notification(&self, record: NotificationRecord) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FeedMessage::AddNotification {
                record,
                response: tx,
            })
            .map_err(|_| FeedError::ActorUnavailable)?;

        rx.await.map_err(|_| FeedError::ActorUnavailable)
    }

    /// Reconcile a batch. Returns how many records were new.
    pub async fn bulk_add(&self, records: Vec<NotificationRecord>) -> Result<usize, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FeedMessage::BulkAdd {
                records,
                response: tx,
            })
            .map_err(|_| FeedError::ActorUnavailable)?;

        rx.await.map_err(|_| FeedError::ActorUnavailable)
    }

    /// Mark one notification read. Returns whether it is in the feed.
    pub async fn mark_read(&self, id: impl Into<String>) -> Result<bool, FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FeedMessage::MarkRead {
                id: id.into(),
                response: tx,
            })
            .map_err(|_| FeedError::ActorUnavailable)?;

        rx.await.map_err(|_| FeedError::ActorUnavailable)
    }

    pub async fn mark_all_read(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FeedMessage::MarkAllRead { response: tx })
            .map_err(|_| FeedError::ActorUnavailable)?;

        rx.await.map_err(|_| FeedError::ActorUnavailable)
    }

    /// Drop the feed and every read flag. Persistence failures are returned.
    pub async fn clear(&self) -> Result<(), FeedError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FeedMessage::Clear { response: tx })
            .map_err(|_| FeedError::ActorUnavailable)?;

        rx.await.map_err(|_| FeedError::ActorUnavailable)?
    }

    /// Get the ordered feed. Empty if the actor is gone.
    pub async fn feed(&self) -> Vec<NotificationRecord> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(FeedMessage::GetFeed { response: tx })
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Get the unread count. Zero if the actor is gone.
    pub async fn unread_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(FeedMessage::GetUnreadCount { response: tx })
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Shutdown the feed actor.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(FeedMessage::Shutdown);
    }
}

/// Spawn a feed actor for a parent.
///
/// Returns once persisted state is loaded.
pub async fn spawn_feed(
    parent_id: String,
    kv: Arc<dyn KvStore>,
    changes: Option<broadcast::Sender<FeedChange>>,
) -> FeedHandle {
    let (tx, rx) = mpsc::unbounded_channel();

    let actor = FeedActor::new(parent_id, kv, rx, changes).await;

    // Spawn the actor on tokio runtime
    tokio::spawn(async move {
        actor.run().await;
    });

    FeedHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryKvStore;
    use crate::models::NotificationKind;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, secs: i64) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            kind: NotificationKind::Announcement,
            content: format!("content {}", id),
            occurred_at: Utc.timestamp_opt(secs, 0).unwrap(),
            subject_entity_id: None,
            read: false,
        }
    }

    #[tokio::test]
    async fn test_feed_actor_creation() {
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv, None).await;

        assert!(handle.feed().await.is_empty());
        assert_eq!(handle.unread_count().await, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_persists_snapshot() {
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv.clone(), None).await;

        handle.add_notification(rec("a", 10)).await.unwrap();

        let raw = kv.get(&snapshot_key("p1")).await.unwrap().unwrap();
        let stored: Vec<NotificationRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "a");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_cold_start_restores_feed_and_read_flags() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        let first = spawn_feed("p1".to_string(), kv.clone(), None).await;
        first.add_notification(rec("a", 10)).await.unwrap();
        first.add_notification(rec("b", 20)).await.unwrap();
        assert!(first.mark_read("a").await.unwrap());
        first.shutdown().await;

        let second = spawn_feed("p1".to_string(), kv, None).await;
        let feed = second.feed().await;
        let ids: Vec<&str> = feed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(feed[1].read);
        assert!(!feed[0].read);
        assert_eq!(second.unread_count().await, 1);

        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_state_overrides_snapshot_flags() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let mut stale = rec("a", 10);
        stale.read = true;
        let mut marked = rec("b", 20);
        marked.read = false;
        kv.set(
            &snapshot_key("p1"),
            &serde_json::to_string(&vec![marked, stale]).unwrap(),
        )
        .await
        .unwrap();
        kv.set(&read_state_key("p1"), r#"{"b":true}"#).await.unwrap();

        let handle = spawn_feed("p1".to_string(), kv, None).await;
        let feed = handle.feed().await;
        assert_eq!(feed[0].id, "b");
        assert!(feed[0].read);
        assert_eq!(feed[1].id, "a");
        assert!(!feed[1].read);
    }

    #[tokio::test]
    async fn test_parents_do_not_share_state() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let p1 = spawn_feed("p1".to_string(), kv.clone(), None).await;
        p1.add_notification(rec("a", 10)).await.unwrap();

        let p2 = spawn_feed("p2".to_string(), kv, None).await;
        assert!(p2.feed().await.is_empty());
    }

    #[tokio::test]
    async fn test_readd_of_read_id_comes_back_unread() {
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv, None).await;

        handle.add_notification(rec("a", 10)).await.unwrap();
        handle.mark_read("a").await.unwrap();
        assert_eq!(handle.unread_count().await, 0);

        handle.add_notification(rec("a", 10)).await.unwrap();
        assert_eq!(handle.unread_count().await, 1);
    }

    #[tokio::test]
    async fn test_clear_wipes_persisted_state() {
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv.clone(), None).await;

        handle.add_notification(rec("a", 10)).await.unwrap();
        handle.mark_read("a").await.unwrap();
        handle.clear().await.unwrap();

        assert!(handle.feed().await.is_empty());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv, Some(tx)).await;

        handle.add_notification(rec("a", 10)).await.unwrap();
        let change = rx.try_recv().expect("Should have received a FeedChange");
        assert_eq!(
            change,
            FeedChange {
                parent_id: "p1".to_string(),
                len: 1,
                unread_count: 1,
            }
        );

        handle.mark_all_read().await.unwrap();
        assert_eq!(rx.try_recv().unwrap().unread_count, 0);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let kv = Arc::new(MemoryKvStore::new());
        let handle = spawn_feed("p1".to_string(), kv, None).await;
        handle.shutdown().await;

        // Give the actor a chance to exit
        tokio::task::yield_now().await;
        let mut closed = false;
        for _ in 0..100 {
            if handle.is_closed() {
                closed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(closed);

        let result = handle.add_notification(rec("a", 1)).await;
        assert!(matches!(result, Err(FeedError::ActorUnavailable)));
        assert!(handle.feed().await.is_empty());
    }
}
