//! Games read model backing the snapshot sent when a client joins a date.

use async_trait::async_trait;
use rusqlite::params;

use crate::db::models::GameRow;
use crate::db::DbPool;
use crate::subscriptions::StoreError;

#[async_trait]
pub trait GameStore: Send + Sync {
    /// All games scheduled on `date` (`YYYY-MM-DD`), ordered by start time.
    async fn games_on_date(&self, date: &str) -> Result<Vec<GameRow>, StoreError>;

    /// Insert or replace a game row.
    async fn upsert_game(&self, game: GameRow) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteGames {
    db: DbPool,
}

impl SqliteGames {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GameStore for SqliteGames {
    async fn games_on_date(&self, date: &str) -> Result<Vec<GameRow>, StoreError> {
        let db = self.db.clone();
        let date = date.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<GameRow>, StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            let mut stmt = conn.prepare(
                "SELECT id, homescore, awayscore, hometeam, awayteam, starttime,
                        clock, status, date, homerecord, awayrecord
                 FROM games
                 WHERE date = ?1
                 ORDER BY starttime ASC, id ASC",
            )?;
            let games = stmt
                .query_map(params![date], |row| {
                    Ok(GameRow {
                        id: row.get(0)?,
                        homescore: row.get(1)?,
                        awayscore: row.get(2)?,
                        hometeam: row.get(3)?,
                        awayteam: row.get(4)?,
                        starttime: row.get(5)?,
                        clock: row.get(6)?,
                        status: row.get(7)?,
                        date: row.get(8)?,
                        homerecord: row.get(9)?,
                        awayrecord: row.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(games)
        })
        .await?
    }

    async fn upsert_game(&self, game: GameRow) -> Result<(), StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.execute(
                "INSERT OR REPLACE INTO games
                    (id, homescore, awayscore, hometeam, awayteam, starttime,
                     clock, status, date, homerecord, awayrecord)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    game.id,
                    game.homescore,
                    game.awayscore,
                    game.hometeam,
                    game.awayteam,
                    game.starttime,
                    game.clock,
                    game.status,
                    game.date,
                    game.homerecord,
                    game.awayrecord,
                ],
            )?;
            Ok(())
        })
        .await?
    }
}
