use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Subscription registries

CREATE TABLE game_connections (
    connection_id TEXT PRIMARY KEY,
    game_id TEXT NOT NULL,
    connected_at TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX idx_game_connections_game ON game_connections(game_id, connection_id);
CREATE INDEX idx_game_connections_expiry ON game_connections(expires_at);

CREATE TABLE date_connections (
    connection_id TEXT PRIMARY KEY,
    date_string TEXT NOT NULL,
    connected_at TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX idx_date_connections_date ON date_connections(date_string, connection_id);
CREATE INDEX idx_date_connections_expiry ON date_connections(expires_at);
",
        ),
        M::up(
            "-- Migration 2: Games read model for date snapshots

CREATE TABLE games (
    id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    hometeam TEXT NOT NULL,
    awayteam TEXT NOT NULL,
    homescore INTEGER,
    awayscore INTEGER,
    starttime TEXT,
    clock TEXT,
    status TEXT,
    homerecord TEXT,
    awayrecord TEXT
);

CREATE INDEX idx_games_date ON games(date);
",
        ),
    ])
}
