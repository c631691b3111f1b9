use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::games::{GameStore, SqliteGames};
use crate::notify::{
    ChangeEventExtractor, FanoutDispatcher, Notifier, StaleConnectionReaper, TokioSleeper,
};
use crate::subscriptions::{SqliteSubscriptions, SubscriptionRegistry};
use crate::ws::push::LocalPushTransport;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket connections on this process, keyed by connection id
    pub connections: ConnectionRegistry,
    /// Durable game/date subscriptions
    pub subscriptions: Arc<dyn SubscriptionRegistry>,
    /// Games read model for join snapshots
    pub games: Arc<dyn GameStore>,
    /// Change batch -> fan-out pipeline
    pub notifier: Arc<Notifier>,
    /// Lifetime given to new subscriptions
    pub ttl_seconds: u64,
}

impl AppState {
    /// Wire the SQLite stores, local push transport and fan-out pipeline together.
    pub fn build(
        db: DbPool,
        connections: ConnectionRegistry,
        config: &Config,
    ) -> Result<Self, regex::Error> {
        let notify = config.notify.clone().validated();

        let subscriptions = Arc::new(SqliteSubscriptions::new(
            db.clone(),
            notify.delete_batch_size,
        ));
        let transport = Arc::new(LocalPushTransport::new(connections.clone()));
        let reaper = StaleConnectionReaper::new(
            subscriptions.clone(),
            Arc::new(TokioSleeper),
            &notify,
        );
        let dispatcher = FanoutDispatcher::new(subscriptions.clone(), transport, reaper, &notify);
        let extractor = ChangeEventExtractor::new(&config.sources)?;

        Ok(Self {
            connections,
            subscriptions,
            games: Arc::new(SqliteGames::new(db)),
            notifier: Arc::new(Notifier::new(extractor, dispatcher)),
            ttl_seconds: notify.ttl_seconds,
        })
    }
}
