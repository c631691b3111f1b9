//! Client frame handling: join, unfollow, and the date snapshot reply.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::notify::events::is_schedule_date;
use crate::notify::NotificationPayload;
use crate::state::AppState;
use crate::subscriptions::Registry;
use crate::ws::ConnectionSender;

/// Frames a client may send, routed on `action`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(alias = "followGame")]
    JoinGame {
        #[serde(rename = "gameId")]
        game_id: String,
    },
    #[serde(alias = "followDate")]
    JoinDate {
        date: String,
    },
    UnfollowGame,
    UnfollowDate,
}

/// Reply sent when a client frame cannot be honoured.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "error")]
struct ErrorReply<'a> {
    message: &'a str,
}

/// Decode a text frame and apply it for `connection_id`.
pub async fn handle_text_message(
    text: &str,
    tx: &ConnectionSender,
    state: &AppState,
    connection_id: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %e,
                "Malformed client frame"
            );
            send_error(tx, "Malformed message").await;
            return;
        }
    };

    match message {
        ClientMessage::JoinGame { game_id } => {
            if game_id.trim().is_empty() {
                send_error(tx, "Missing gameId").await;
                return;
            }
            join(state, tx, Registry::Game, connection_id, &game_id).await;
        }
        ClientMessage::JoinDate { date } => {
            if !is_schedule_date(&date) {
                send_error(tx, "Missing or invalid date").await;
                return;
            }
            if join(state, tx, Registry::Date, connection_id, &date).await {
                send_date_snapshot(state, tx, connection_id, &date).await;
            }
        }
        ClientMessage::UnfollowGame => unfollow(state, Registry::Game, connection_id).await,
        ClientMessage::UnfollowDate => unfollow(state, Registry::Date, connection_id).await,
    }
}

async fn join(
    state: &AppState,
    tx: &ConnectionSender,
    registry: Registry,
    connection_id: &str,
    entity_key: &str,
) -> bool {
    match state
        .subscriptions
        .join(registry, connection_id, entity_key, state.ttl_seconds)
        .await
    {
        Ok(()) => {
            tracing::info!(
                connection_id = %connection_id,
                registry = %registry,
                entity_key = %entity_key,
                "Connection joined"
            );
            true
        }
        Err(e) => {
            tracing::error!(
                connection_id = %connection_id,
                registry = %registry,
                error = %e,
                "Failed to store subscription"
            );
            send_error(tx, "Subscription failed").await;
            false
        }
    }
}

async fn unfollow(state: &AppState, registry: Registry, connection_id: &str) {
    if let Err(e) = state.subscriptions.unfollow(registry, connection_id).await {
        tracing::error!(
            connection_id = %connection_id,
            registry = %registry,
            error = %e,
            "Failed to remove subscription"
        );
    }
}

/// Send the date's current games straight back to the joining connection.
async fn send_date_snapshot(
    state: &AppState,
    tx: &ConnectionSender,
    connection_id: &str,
    date: &str,
) {
    let games = match state.games.games_on_date(date).await {
        Ok(games) => games,
        Err(e) => {
            tracing::error!(
                connection_id = %connection_id,
                date = %date,
                error = %e,
                "Failed to load date snapshot"
            );
            send_error(tx, "Snapshot unavailable").await;
            return;
        }
    };

    match NotificationPayload::date_snapshot(games).to_json() {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into())).await;
        }
        Err(e) => {
            tracing::error!(date = %date, error = %e, "Failed to encode date snapshot");
        }
    }
}

async fn send_error(tx: &ConnectionSender, message: &str) {
    if let Ok(json) = serde_json::to_string(&ErrorReply { message }) {
        let _ = tx.send(Message::Text(json.into())).await;
    }
}
