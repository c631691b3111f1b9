//! SQLite-backed subscription registry and index.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    DeleteOutcome, Registry, StoreError, SubscriberPage, SubscriptionIndex, SubscriptionRegistry,
};
use crate::db::models::ConnectionRow;
use crate::db::DbPool;

/// Both registries and their reverse index, stored in one SQLite database.
#[derive(Clone)]
pub struct SqliteSubscriptions {
    db: DbPool,
    /// Maximum ids handled by one `delete_many` call
    delete_ceiling: usize,
}

impl SqliteSubscriptions {
    pub fn new(db: DbPool, delete_ceiling: usize) -> Self {
        Self {
            db,
            delete_ceiling: delete_ceiling.max(1),
        }
    }

    /// Run `f` against the locked connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut conn)
        })
        .await?
    }

    /// Look up the connection's row in one registry.
    pub async fn subscription(
        &self,
        registry: Registry,
        connection_id: &str,
    ) -> Result<Option<ConnectionRow>, StoreError> {
        let connection_id = connection_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT connection_id, {key}, connected_at, expires_at FROM {table}
                 WHERE connection_id = ?1",
                key = registry.key_column(),
                table = registry.table(),
            );
            let row = conn
                .query_row(&sql, params![connection_id], |row| {
                    Ok(ConnectionRow {
                        connection_id: row.get(0)?,
                        entity_key: row.get(1)?,
                        connected_at: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// Number of connections subscribed to `entity_key`.
    pub async fn subscriber_count(
        &self,
        registry: Registry,
        entity_key: &str,
    ) -> Result<usize, StoreError> {
        let entity_key = entity_key.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT COUNT(*) FROM {table} WHERE {key} = ?1",
                key = registry.key_column(),
                table = registry.table(),
            );
            let count: i64 = conn.query_row(&sql, params![entity_key], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

#[async_trait]
impl SubscriptionRegistry for SqliteSubscriptions {
    async fn join(
        &self,
        registry: Registry,
        connection_id: &str,
        entity_key: &str,
        ttl_seconds: u64,
    ) -> Result<(), StoreError> {
        let connection_id = connection_id.to_string();
        let entity_key = entity_key.to_string();
        let now = Utc::now();
        let connected_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires_at = now.timestamp().saturating_add(ttl);

        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO {table} (connection_id, {key}, connected_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(connection_id) DO UPDATE SET
                    {key} = excluded.{key},
                    connected_at = excluded.connected_at,
                    expires_at = excluded.expires_at",
                key = registry.key_column(),
                table = registry.table(),
            );
            conn.execute(&sql, params![connection_id, entity_key, connected_at, expires_at])?;
            Ok(())
        })
        .await?;

        tracing::debug!(registry = %registry, "Subscription stored");
        Ok(())
    }

    async fn leave(&self, connection_id: &str) -> Result<(), StoreError> {
        let connection_id = connection_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for registry in Registry::ALL {
                let sql = format!("DELETE FROM {} WHERE connection_id = ?1", registry.table());
                tx.execute(&sql, params![connection_id])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn unfollow(&self, registry: Registry, connection_id: &str) -> Result<(), StoreError> {
        let connection_id = connection_id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM {} WHERE connection_id = ?1", registry.table());
            conn.execute(&sql, params![connection_id])?;
            Ok(())
        })
        .await
    }

    async fn delete_many(
        &self,
        registry: Registry,
        connection_ids: &[String],
    ) -> Result<DeleteOutcome, StoreError> {
        let split = connection_ids.len().min(self.delete_ceiling);
        let batch = connection_ids[..split].to_vec();
        let unprocessed = connection_ids[split..].to_vec();

        let deleted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                {
                    let sql = format!("DELETE FROM {} WHERE connection_id = ?1", registry.table());
                    let mut stmt = tx.prepare(&sql)?;
                    for id in &batch {
                        stmt.execute(params![id])?;
                    }
                }
                tx.commit()?;
                Ok(batch)
            })
            .await?;

        Ok(DeleteOutcome {
            deleted,
            unprocessed,
        })
    }

    async fn sweep_expired(&self, now_epoch: i64) -> Result<usize, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            for registry in Registry::ALL {
                let sql = format!("DELETE FROM {} WHERE expires_at <= ?1", registry.table());
                removed += tx.execute(&sql, params![now_epoch])?;
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl SubscriptionIndex for SqliteSubscriptions {
    async fn fetch_page(
        &self,
        registry: Registry,
        entity_key: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<SubscriberPage, StoreError> {
        let entity_key = entity_key.to_string();
        let cursor = cursor.unwrap_or_default().to_string();
        let limit = limit.max(1);

        let connection_ids = self
            .with_conn(move |conn| {
                // Keyset pagination: rows deleted between pages cannot shift later pages
                let sql = format!(
                    "SELECT connection_id FROM {table}
                     WHERE {key} = ?1 AND connection_id > ?2
                     ORDER BY connection_id
                     LIMIT ?3",
                    key = registry.key_column(),
                    table = registry.table(),
                );
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map(params![entity_key, cursor, limit as i64], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await?;

        let next_cursor = if connection_ids.len() == limit {
            connection_ids.last().cloned()
        } else {
            None
        };

        Ok(SubscriberPage {
            connection_ids,
            next_cursor,
        })
    }
}
