//! Subscription registries and the reverse index used for fan-out.
//!
//! Two independent registries exist: one keyed by game id, one keyed by
//! schedule date. A connection holds at most one row per registry.

pub mod index;
pub mod registry;
pub mod sweep;

use async_trait::async_trait;
use serde::Serialize;

pub use index::SubscriberPages;
pub use registry::SqliteSubscriptions;

/// Which registry a subscription lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Registry {
    Game,
    Date,
}

impl Registry {
    pub const ALL: [Registry; 2] = [Registry::Game, Registry::Date];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Game => "game",
            Self::Date => "date",
        }
    }

    pub(crate) fn table(&self) -> &'static str {
        match self {
            Self::Game => "game_connections",
            Self::Date => "date_connections",
        }
    }

    pub(crate) fn key_column(&self) -> &'static str {
        match self {
            Self::Game => "game_id",
            Self::Date => "date_string",
        }
    }
}

impl std::fmt::Display for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the subscription stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of one bulk delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    /// Ids the store did not get to. The caller decides whether to retry.
    pub unprocessed: Vec<String>,
}

/// One page of subscribers plus the cursor to continue from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberPage {
    pub connection_ids: Vec<String>,
    /// `None` once the key has no further subscribers.
    pub next_cursor: Option<String>,
}

/// Durable (connection -> entity) subscriptions.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Upsert the connection's row in `registry`, replacing any previous entity.
    async fn join(
        &self,
        registry: Registry,
        connection_id: &str,
        entity_key: &str,
        ttl_seconds: u64,
    ) -> Result<(), StoreError>;

    /// Remove the connection from every registry. No-op when nothing is stored.
    async fn leave(&self, connection_id: &str) -> Result<(), StoreError>;

    /// Remove the connection from a single registry.
    async fn unfollow(&self, registry: Registry, connection_id: &str) -> Result<(), StoreError>;

    /// Bulk delete, processing at most the store's per-call ceiling.
    async fn delete_many(
        &self,
        registry: Registry,
        connection_ids: &[String],
    ) -> Result<DeleteOutcome, StoreError>;

    /// Delete rows whose `expires_at` is at or before `now_epoch`. Returns the row count.
    async fn sweep_expired(&self, now_epoch: i64) -> Result<usize, StoreError>;
}

/// Reverse lookup from entity key to subscribed connection ids.
#[async_trait]
pub trait SubscriptionIndex: Send + Sync {
    /// Fetch up to `limit` subscribers of `entity_key` strictly after `cursor`.
    async fn fetch_page(
        &self,
        registry: Registry,
        entity_key: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SubscriberPage, StoreError>;
}

/// Start a lazy page sequence over the subscribers of `entity_key`.
pub fn list_subscribers<'a>(
    index: &'a dyn SubscriptionIndex,
    registry: Registry,
    entity_key: &str,
    page_size: usize,
) -> SubscriberPages<'a> {
    SubscriberPages::new(index, registry, entity_key, page_size)
}
