//! Collaborator interfaces the feed consumes but does not implement:
//! key-value persistence, the realtime change feed, row fetches and the
//! authenticated identity. Each comes with an in-process implementation.
pub mod change_feed;
pub mod filter;
pub mod identity;
pub mod kv;
pub mod postgrest;
pub mod rows;

pub use change_feed::{ChangeFeed, ChannelStatus, LocalChangeFeed, SubscribeRequest, Subscription};
pub use filter::RowFilter;
pub use identity::{IdentityProvider, StaticIdentity};
pub use kv::{KvStore, MemoryKvStore, SqliteKvStore};
pub use postgrest::PostgrestClient;
pub use rows::{MemoryRows, RowFetcher, SelectQuery};
