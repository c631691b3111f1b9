//! JSON messages pushed to subscribed connections.

use serde::Serialize;

use super::events::{ChangeEvent, EventKind};
use crate::db::models::GameRow;

/// A message pushed to clients.
///
/// Game updates carry no `type` tag; the front end recognises them by `gameId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    GameUpdate(GameUpdate),
    Date(DateMessage),
}

/// A game's data object was rewritten; `key`/`version` point at the new copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameUpdate {
    pub game_id: String,
    pub key: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DateMessage {
    /// The schedule for `date` changed; clients re-fetch it.
    DateUpdate { date: String },
    /// Full snapshot of a date's games, sent on join.
    Date { data: Vec<GameRow> },
}

impl NotificationPayload {
    /// The fan-out message for a change event.
    pub fn for_event(event: &ChangeEvent) -> Self {
        match event.kind {
            EventKind::Game => Self::GameUpdate(GameUpdate {
                game_id: event.entity_key.clone(),
                key: event.source_key.clone().unwrap_or_default(),
                version: event.version_token.clone(),
            }),
            EventKind::Date => Self::Date(DateMessage::DateUpdate {
                date: event.entity_key.clone(),
            }),
        }
    }

    pub fn date_snapshot(games: Vec<GameRow>) -> Self {
        Self::Date(DateMessage::Date { data: games })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
