//! Push transport over the sockets held by this process.

use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc::error::TrySendError;

use super::ConnectionRegistry;
use crate::notify::{PushError, PushTransport};

/// Delivers payloads through each connection's outbound channel.
///
/// A connection id with no live socket, or whose socket has shut down, is
/// reported gone. A full outbound buffer means the client is not keeping up,
/// which is reported as throttling rather than staleness.
#[derive(Clone)]
pub struct LocalPushTransport {
    connections: ConnectionRegistry,
}

impl LocalPushTransport {
    pub fn new(connections: ConnectionRegistry) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl PushTransport for LocalPushTransport {
    async fn push(&self, connection_id: &str, payload: &str) -> Result<(), PushError> {
        let sender = match self.connections.get(connection_id) {
            Some(entry) => entry.value().clone(),
            None => return Err(PushError::Gone),
        };

        match sender.try_send(Message::Text(payload.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PushError::Throttled),
            Err(TrySendError::Closed(_)) => {
                self.connections
                    .remove_if(connection_id, |_, s| s.is_closed());
                Err(PushError::Gone)
            }
        }
    }
}
