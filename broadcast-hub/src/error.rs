use std::time::Duration;

use thiserror::Error;

use crate::message::ClientId;

/// Failures raised by the hub core.
///
/// Everything except `InvalidConfig` is scoped to a single connection
/// attempt or a single client and never affects other connections.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("admission rejected: hub is at capacity ({max_clients} clients)")]
    AdmissionRejected { max_clients: usize },

    #[error("hub is shutting down")]
    ShuttingDown,

    #[error("connection upgrade failed: {0}")]
    UpgradeFailed(#[source] axum::Error),

    #[error("recipient {0} not found")]
    RecipientNotFound(ClientId),

    #[error("stream failure on client {id}: {source}")]
    StreamFailure {
        id: ClientId,
        #[source]
        source: TransportError,
    },

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures of a single duplex frame stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream closed")]
    Closed,

    #[error("outbound queue is full")]
    QueueFull,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;
