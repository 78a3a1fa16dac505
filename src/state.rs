use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::backend::{ChangeFeed, IdentityProvider, KvStore, RowFetcher};
use crate::config::FeedConfig;
use crate::engine::{refresh_feed, FeedChange, FeedHandle, FeedManager, SubscriptionFanIn, SubscriptionState};
use crate::error::FeedError;
use crate::models::NotificationKind;

/// The signed-in parent's live feed and its subscriptions.
struct Session {
    parent_id: String,
    feed: FeedHandle,
    fan_in: SubscriptionFanIn,
}

/// Application state injected into every consumer.
///
/// Views read the feed through the `FeedHandle` it hands out; all
/// mutation goes through the handle's methods, so the feed actor stays
/// the single writer.
pub struct AppState {
    pub config: FeedConfig,
    feeds: FeedManager,
    rows: Arc<dyn RowFetcher>,
    change_feed: Arc<dyn ChangeFeed>,
    identity: Arc<dyn IdentityProvider>,
    session: Mutex<Option<Session>>,
}

impl AppState {
    pub fn new(
        config: FeedConfig,
        kv: Arc<dyn KvStore>,
        rows: Arc<dyn RowFetcher>,
        change_feed: Arc<dyn ChangeFeed>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            feeds: FeedManager::new(kv),
            rows,
            change_feed,
            identity,
            session: Mutex::new(None),
        }
    }

    /// Start the feed for whoever is signed in.
    ///
    /// Any previous session is ended first. Returns `None` when nobody
    /// is signed in or the user is not a parent; that is not an error.
    pub async fn start_session(&self) -> Option<FeedHandle> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            self.teardown(previous).await;
        }

        let parent_id = match self.identity.current() {
            Some(identity) if identity.is_parent() => identity.user_id,
            _ => return None,
        };

        let feed = match self.feeds.get_feed(&parent_id) {
            Some(feed) => feed,
            None => match self.feeds.spawn_feed(&parent_id).await {
                Ok(feed) => feed,
                Err(e) => {
                    log::error!("Could not start feed for {}: {}", parent_id, e);
                    return None;
                }
            },
        };

        let fan_in = SubscriptionFanIn::start(
            self.identity.as_ref(),
            self.rows.clone(),
            self.change_feed.clone(),
            feed.clone(),
            self.config.scope_timeout(),
        )
        .await;

        *session = Some(Session {
            parent_id,
            feed: feed.clone(),
            fan_in,
        });
        Some(feed)
    }

    /// End the current session (logout): release every subscription and
    /// stop the feed actor. Persisted read flags survive.
    pub async fn end_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            self.teardown(session).await;
        }
    }

    async fn teardown(&self, mut session: Session) {
        session.fan_in.stop().await;
        if let Err(e) = self.feeds.shutdown_feed(&session.parent_id).await {
            log::warn!("Feed shutdown for {}: {}", session.parent_id, e);
        }
        log::info!("Session for {} ended", session.parent_id);
    }

    /// Feed of the current session, if any.
    pub async fn feed(&self) -> Option<FeedHandle> {
        self.session.lock().await.as_ref().map(|s| s.feed.clone())
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<FeedChange> {
        self.feeds.subscribe_changes()
    }

    pub async fn subscription_status(&self) -> HashMap<NotificationKind, SubscriptionState> {
        match self.session.lock().await.as_ref() {
            Some(session) => session.fan_in.statuses(),
            None => NotificationKind::ALL
                .iter()
                .map(|kind| (*kind, SubscriptionState::Unsubscribed))
                .collect(),
        }
    }

    /// Reconcile the feed against a fresh fetch of every source.
    ///
    /// Returns the number of new records; zero without a subscribed session.
    pub async fn refresh(&self) -> Result<usize, FeedError> {
        let (feed, lookups) = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) => match s.fan_in.lookups() {
                    Some(lookups) => (s.feed.clone(), lookups),
                    None => return Ok(0),
                },
                None => return Ok(0),
            }
        };
        refresh_feed(&feed, &lookups, self.config.refresh_limit).await
    }

    /// The user-initiated "clear all data" action.
    ///
    /// Unlike every other failure in the feed, a persistence error here is
    /// returned so the caller can tell the user.
    pub async fn clear_all_data(&self) -> Result<(), FeedError> {
        match self.feed().await {
            Some(feed) => feed.clear().await,
            None => Ok(()),
        }
    }
}
