// ── Transport errors (C3) ──

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed to {address}: {reason}")]
    SendFailed { address: String, reason: String },

    #[error("transport timed out waiting for send to {address}")]
    Timeout { address: String },

    #[error("transport lost: {0}")]
    Lost(String),

    #[error("no route to endpoint {0}")]
    UnknownEndpoint(String),
}
