//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] audiobridge_protocol::ProtocolError),

    #[error("receive queue overflow: {needed} bytes needed, {free} free")]
    QueueOverflow { needed: usize, free: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the peer broke the wire protocol.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            ServerError::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }
}
