mod actor;
mod fan_in;
mod feed;
mod lookup;
mod manager;
pub mod normalizer;
mod read_state;
mod refresh;

pub use actor::{
    read_state_key, snapshot_key, spawn_feed, FeedActor, FeedChange, FeedHandle, FeedMessage,
};
pub use fan_in::{SubscriptionFanIn, SubscriptionState};
pub use feed::Feed;
pub use lookup::{resolve_scope, AuthorizedScope, Lookups};
pub use manager::FeedManager;
pub use normalizer::{normalize, Lookup};
pub use read_state::ReadStateStore;
pub use refresh::refresh_feed;
