//! Database row types.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

use serde::{Deserialize, Serialize};

/// Subscription row in game_connections or date_connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    pub connection_id: String,
    /// Game id or `YYYY-MM-DD` date, depending on the registry
    pub entity_key: String,
    pub connected_at: String,
    /// TTL as epoch seconds
    pub expires_at: i64,
}

/// Game summary row. Field names match the JSON the front end already reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRow {
    pub id: String,
    pub homescore: Option<i64>,
    pub awayscore: Option<i64>,
    pub hometeam: String,
    pub awayteam: String,
    pub starttime: Option<String>,
    pub clock: Option<String>,
    pub status: Option<String>,
    pub date: String,
    pub homerecord: Option<String>,
    pub awayrecord: Option<String>,
}
