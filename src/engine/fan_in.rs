//! Subscription fan-in.
//!
//! Owns one live subscription per source, each scoped to the children the
//! signed-in parent may observe, and routes every change through the
//! normalizer into the feed actor. Sources are isolated: each runs in its
//! own task, and an error on one never touches the others.
//!
//! Per-source lifecycle:
//!
//! ```text
//! Unsubscribed -> Subscribing -> Active -> (Error | Unsubscribed)
//! ```
//!
//! Only `Active` forwards events. `Error` is terminal for the source until
//! the fan-in is started again; there is no automatic reconnect.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    ChangeFeed, ChannelStatus, IdentityProvider, RowFetcher, SubscribeRequest, Subscription,
};
use crate::engine::actor::FeedHandle;
use crate::engine::lookup::{resolve_scope, AuthorizedScope, Lookups};
use crate::engine::normalizer::normalize;
use crate::error::FeedError;
use crate::models::{ChangeType, NotificationKind, RawChange, SourceEvent};
use crate::utils::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Error,
}

type States = Arc<DashMap<NotificationKind, SubscriptionState>>;

struct RunningSource {
    kind: NotificationKind,
    subscription_id: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct SubscriptionFanIn {
    change_feed: Arc<dyn ChangeFeed>,
    states: States,
    sources: Vec<RunningSource>,
    lookups: Option<Arc<Lookups>>,
}

impl SubscriptionFanIn {
    /// Resolve the parent's scope and open one subscription per source.
    ///
    /// No identity, a non-parent identity, a failed or timed-out scope
    /// query, or a parent without children all produce an inert fan-in
    /// with no subscriptions. None of these is an error.
    pub async fn start(
        identity: &dyn IdentityProvider,
        rows: Arc<dyn RowFetcher>,
        change_feed: Arc<dyn ChangeFeed>,
        feed: FeedHandle,
        scope_timeout: Duration,
    ) -> Self {
        let states: States = Arc::new(
            NotificationKind::ALL
                .iter()
                .map(|kind| (*kind, SubscriptionState::Unsubscribed))
                .collect(),
        );
        let mut fan_in = Self {
            change_feed,
            states,
            sources: Vec::new(),
            lookups: None,
        };

        let parent_id = match identity.current() {
            Some(identity) if identity.is_parent() => identity.user_id,
            Some(identity) => {
                log::info!(
                    "Not subscribing: {} is signed in as {:?}",
                    identity.user_id,
                    identity.role
                );
                return fan_in;
            }
            None => {
                log::info!("Not subscribing: nobody is signed in");
                return fan_in;
            }
        };

        let scope =
            match tokio::time::timeout(scope_timeout, resolve_scope(rows.as_ref(), &parent_id))
                .await
            {
                Ok(Ok(scope)) => scope,
                Ok(Err(e)) => {
                    log::warn!("Not subscribing {}: {}", parent_id, e);
                    return fan_in;
                }
                Err(_) => {
                    let error = FeedError::ScopeResolution(format!(
                        "timed out after {:?}",
                        scope_timeout
                    ));
                    log::warn!("Not subscribing {}: {}", parent_id, error);
                    return fan_in;
                }
            };

        if scope.is_empty() {
            log::info!("Not subscribing: {} has no linked children", parent_id);
            return fan_in;
        }

        let lookups = Arc::new(Lookups::new(rows, Arc::new(scope)));
        fan_in.lookups = Some(lookups.clone());

        for kind in NotificationKind::ALL {
            fan_in.open(kind, &feed, &lookups).await;
        }
        fan_in
    }

    async fn open(&mut self, kind: NotificationKind, feed: &FeedHandle, lookups: &Arc<Lookups>) {
        let filter = match lookups.scope().filter_for(kind) {
            Some(filter) => filter,
            None => {
                log::info!("No {} subscription: nothing in scope", kind);
                return;
            }
        };

        self.states.insert(kind, SubscriptionState::Subscribing);
        let request = SubscribeRequest {
            table: kind.table().to_string(),
            filter,
            events: vec![ChangeType::Insert, ChangeType::Update, ChangeType::Delete],
        };

        let subscription = match self.change_feed.subscribe(request).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let error = FeedError::Subscription {
                    kind,
                    message: e.to_string(),
                };
                log::warn!("{}", error);
                self.states.insert(kind, SubscriptionState::Error);
                return;
            }
        };

        let Subscription { id, events, status } = subscription;
        let token = CancellationToken::new();
        let task = tokio::spawn(forward(
            kind,
            events,
            status,
            token.clone(),
            feed.clone(),
            lookups.clone(),
            self.states.clone(),
        ));

        log::info!("Subscribed to {} ({})", kind, id);
        self.sources.push(RunningSource {
            kind,
            subscription_id: id,
            token,
            task,
        });
    }

    pub fn status(&self, kind: NotificationKind) -> SubscriptionState {
        self.states
            .get(&kind)
            .map(|s| *s.value())
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    pub fn statuses(&self) -> HashMap<NotificationKind, SubscriptionState> {
        self.states
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Number of subscriptions currently held open.
    pub fn open_count(&self) -> usize {
        self.sources.len()
    }

    pub fn scope(&self) -> Option<&AuthorizedScope> {
        self.lookups.as_deref().map(Lookups::scope)
    }

    pub fn lookups(&self) -> Option<Arc<Lookups>> {
        self.lookups.clone()
    }

    /// Cancel every forwarding task and release every subscription.
    ///
    /// An event being processed when this is called is dropped before it
    /// reaches the feed or, if already handed over, completes normally.
    pub async fn stop(&mut self) {
        for source in self.sources.drain(..) {
            source.token.cancel();
            self.change_feed.unsubscribe(&source.subscription_id).await;
            if let Err(e) = source.task.await {
                log::warn!("{} forwarding task ended abnormally: {}", source.kind, e);
            }
            self.states
                .insert(source.kind, SubscriptionState::Unsubscribed);
            log::info!("Unsubscribed from {} ({})", source.kind, source.subscription_id);
        }
    }
}

impl Drop for SubscriptionFanIn {
    fn drop(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        log::warn!(
            "Subscription fan-in dropped with {} open subscriptions; releasing",
            self.sources.len()
        );
        let ids: Vec<String> = self
            .sources
            .drain(..)
            .map(|source| {
                source.token.cancel();
                source.subscription_id
            })
            .collect();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let change_feed = self.change_feed.clone();
            runtime.spawn(async move {
                for id in ids {
                    change_feed.unsubscribe(&id).await;
                }
            });
        }
    }
}

/// Track a transport status. Returns false once the source must stop.
fn apply_status(kind: NotificationKind, status: &ChannelStatus, states: &States) -> bool {
    let (state, keep_running) = match status {
        ChannelStatus::Subscribing => (SubscriptionState::Subscribing, true),
        ChannelStatus::Subscribed => (SubscriptionState::Active, true),
        ChannelStatus::Error(message) => {
            log::warn!("{} subscription failed: {}", kind, message);
            (SubscriptionState::Error, false)
        }
        ChannelStatus::Closed => (SubscriptionState::Unsubscribed, false),
    };
    log::debug!("{} subscription is {:?}", kind, state);
    states.insert(kind, state);
    keep_running
}

async fn forward(
    kind: NotificationKind,
    mut events: mpsc::Receiver<RawChange>,
    mut status: watch::Receiver<ChannelStatus>,
    token: CancellationToken,
    feed: FeedHandle,
    lookups: Arc<Lookups>,
    states: States,
) {
    let initial = status.borrow_and_update().clone();
    if !apply_status(kind, &initial, &states) {
        return;
    }

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            changed = status.changed() => {
                if changed.is_err() {
                    log::debug!("{} status channel closed", kind);
                    states.insert(kind, SubscriptionState::Unsubscribed);
                    break;
                }
                let current = status.borrow_and_update().clone();
                if !apply_status(kind, &current, &states) {
                    break;
                }
            }

            received = events.recv() => {
                let raw = match received {
                    Some(raw) => raw,
                    None => {
                        log::debug!("{} event stream ended", kind);
                        break;
                    }
                };
                if states.get(&kind).map(|s| *s.value()) != Some(SubscriptionState::Active) {
                    log::debug!("Dropping {} event received while not active", kind);
                    continue;
                }

                let delivered = tokio::select! {
                    _ = token.cancelled() => {
                        log::debug!("Dropping in-flight {} event on teardown", kind);
                        break;
                    }
                    delivered = handle_change(kind, raw, &feed, &lookups) => delivered,
                };
                if !delivered {
                    log::info!("Feed is gone, stopping {} forwarding", kind);
                    break;
                }
            }
        }
    }
}

/// Normalize and merge one change. Returns false if the feed actor is gone.
async fn handle_change(
    kind: NotificationKind,
    raw: RawChange,
    feed: &FeedHandle,
    lookups: &Lookups,
) -> bool {
    let event = match SourceEvent::parse(kind, &raw) {
        Ok(Some(event)) => event,
        Ok(None) => {
            log::debug!("Ignoring {} delete", kind);
            return true;
        }
        Err(e) => {
            log::warn!("Dropping {} event: {}", kind, e);
            return true;
        }
    };

    let lookup = lookups.resolve(&event).await;
    let record = normalize(&event, &lookup, now_utc());
    log::debug!("Merging {} into the feed", record.id);
    feed.add_notification(record).await.is_ok()
}
