pub mod actor;
pub mod handler;
pub mod protocol;
pub mod push;

use axum::extract::ws::Message;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound frames buffered per connection before pushes count as throttled.
pub const OUTBOUND_BUFFER: usize = 64;

/// Sender half of a WebSocket connection's outbound channel.
/// The connection's writer task drains it into the socket.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Live sockets on this process, keyed by server-assigned connection id.
pub type ConnectionRegistry = Arc<DashMap<String, ConnectionSender>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
