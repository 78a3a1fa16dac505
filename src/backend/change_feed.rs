//! Realtime change-feed collaborator.
//!
//! The hosted backend pushes insert/update/delete events for a table,
//! filtered server-side. The feed core only sees the `ChangeFeed` trait:
//! `subscribe` hands back a `Subscription` whose events and connection
//! status arrive over channels, and `unsubscribe` releases it.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};

use super::filter::RowFilter;
use crate::error::FeedError;
use crate::models::{ChangeType, RawChange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub table: String,
    pub filter: RowFilter,
    pub events: Vec<ChangeType>,
}

/// Connection status reported by the transport for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribing,
    Subscribed,
    Error(String),
    Closed,
}

/// An open subscription. Dropping the receivers does not release the
/// server side; call `ChangeFeed::unsubscribe` with `id`.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub events: mpsc::Receiver<RawChange>,
    pub status: watch::Receiver<ChannelStatus>,
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, FeedError>;

    /// Release a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, subscription_id: &str);
}

struct LocalSubscriber {
    request: SubscribeRequest,
    events: mpsc::Sender<RawChange>,
    status: watch::Sender<ChannelStatus>,
}

impl LocalSubscriber {
    fn wants(&self, table: &str, change: &RawChange) -> bool {
        if self.request.table != table || !self.request.events.contains(&change.event_type) {
            return false;
        }
        // Deletes only carry the old row
        let row = change.new_row.as_ref().or(change.old_row.as_ref());
        row.map(|r| self.request.filter.matches(r)).unwrap_or(false)
    }
}

/// In-process change feed.
///
/// Rows published with `publish` are routed to every matching
/// subscription, applying the same table/event/filter rules the hosted
/// transport applies. Used for local development and tests.
pub struct LocalChangeFeed {
    subscribers: DashMap<String, LocalSubscriber>,
    buffer: usize,
}

impl LocalChangeFeed {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Deliver a change to every subscription that wants it.
    ///
    /// Returns the number of subscriptions the change was delivered to.
    pub async fn publish(&self, table: &str, change: RawChange) -> usize {
        // Collect senders first so no map guard is held across an await
        let targets: Vec<mpsc::Sender<RawChange>> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().wants(table, &change))
            .map(|entry| entry.value().events.clone())
            .collect();

        let mut delivered = 0;
        for tx in targets {
            if tx.send(change.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push a transport error to every subscription on `table`.
    pub fn fail(&self, table: &str, message: &str) {
        for entry in self.subscribers.iter() {
            if entry.value().request.table == table {
                let _ = entry
                    .value()
                    .status
                    .send(ChannelStatus::Error(message.to_string()));
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Filters of the open subscriptions on `table`.
    pub fn filters_for(&self, table: &str) -> Vec<RowFilter> {
        self.subscribers
            .iter()
            .filter(|entry| entry.value().request.table == table)
            .map(|entry| entry.value().request.filter.clone())
            .collect()
    }
}

impl Default for LocalChangeFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl ChangeFeed for LocalChangeFeed {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription, FeedError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (events_tx, events_rx) = mpsc::channel(self.buffer);
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Subscribed);

        log::debug!(
            "Local change feed: {} subscribed to {} ({})",
            id,
            request.table,
            request.filter
        );

        self.subscribers.insert(
            id.clone(),
            LocalSubscriber {
                request,
                events: events_tx,
                status: status_tx,
            },
        );

        Ok(Subscription {
            id,
            events: events_rx,
            status: status_rx,
        })
    }

    async fn unsubscribe(&self, subscription_id: &str) {
        if let Some((_, subscriber)) = self.subscribers.remove(subscription_id) {
            let _ = subscriber.status.send(ChannelStatus::Closed);
        }
    }
}
