//! Push transport seam and outcome classification.

use async_trait::async_trait;
use serde::Serialize;

/// HTTP status a push provider uses for a connection that no longer exists.
pub const STATUS_GONE: u16 = 410;

/// Why a push to one connection failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The endpoint no longer exists
    #[error("connection gone")]
    Gone,
    /// The transport is shedding load for this connection
    #[error("throttled")]
    Throttled,
    #[error("timed out")]
    Timeout,
    /// Provider-reported status code
    #[error("provider returned status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

impl PushError {
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone | Self::Status(STATUS_GONE))
    }
}

/// Delivers a serialized payload to a single connection.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn push(&self, connection_id: &str, payload: &str) -> Result<(), PushError>;
}

/// Classification of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered,
    /// Endpoint reported gone; the subscription should be reaped
    Stale,
    /// Failed this round, not retried
    TransientFailure,
}

impl DispatchOutcome {
    pub fn classify(result: &Result<(), PushError>) -> Self {
        match result {
            Ok(()) => Self::Delivered,
            Err(e) if e.is_gone() => Self::Stale,
            Err(_) => Self::TransientFailure,
        }
    }
}
