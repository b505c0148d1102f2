//! Client error types.

use thiserror::Error;

/// Client errors.
///
/// None of these reach the audio thread; the IO thread logs them and goes
/// back to `Disconnected`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] audiobridge_protocol::ProtocolError),

    #[error("connect timeout after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("outbound queue overflowed")]
    Degraded,

    #[error("failed to spawn IO thread: {0}")]
    ThreadSpawn(std::io::Error),
}

impl ClientError {
    /// Returns whether a reconnect may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::ConnectTimeout(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::Degraded => true,
            ClientError::Protocol(_) | ClientError::ThreadSpawn(_) => false,
        }
    }
}
