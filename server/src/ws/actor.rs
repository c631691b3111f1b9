use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::protocol;
use crate::ws::{ConnectionSender, OUTBOUND_BUFFER};

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Abrupt disconnects are otherwise only noticed on the next failed push.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for a WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from a bounded mpsc channel
/// - Reader task: processes incoming frames, dispatches to protocol handlers
///
/// The connection is addressable by its id through the connection registry
/// until the socket closes, at which point its subscriptions are removed.
pub async fn run_connection(socket: WebSocket, state: AppState) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    register_connection(&state, &connection_id, tx.clone());

    tracing::info!(connection_id = %connection_id, "WebSocket actor started");

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx
                .send(Message::Ping(vec![1, 2, 3, 4].into()))
                .await
                .is_err()
            {
                // Writer task has died, connection is gone
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: 1001,
                            reason: "Pong timeout".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    protocol::handle_text_message(text.as_str(), &tx, &state, &connection_id)
                        .await;
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        bytes = data.len(),
                        "Ignoring binary frame"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data)).await;
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    writer_handle.abort();
    ping_handle.abort();

    unregister_connection(&state, &connection_id);

    // Disconnect drops every subscription this connection held
    if let Err(e) = state.subscriptions.leave(&connection_id).await {
        tracing::error!(
            connection_id = %connection_id,
            error = %e,
            "Failed to remove subscriptions on disconnect"
        );
    }

    tracing::info!(connection_id = %connection_id, "WebSocket actor stopped");
}

/// Writer task: receives messages from the channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

fn register_connection(state: &AppState, connection_id: &str, tx: ConnectionSender) {
    state.connections.insert(connection_id.to_string(), tx);
    tracing::debug!(
        connection_id = %connection_id,
        connections = state.connections.len(),
        "Connection registered"
    );
}

fn unregister_connection(state: &AppState, connection_id: &str) {
    state.connections.remove(connection_id);
    tracing::debug!(
        connection_id = %connection_id,
        connections = state.connections.len(),
        "Connection unregistered"
    );
}
