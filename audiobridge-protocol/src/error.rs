//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors raised while decoding the byte stream.
///
/// Every variant except `Io` is a wire violation: the peer sent something the
/// protocol does not allow, and the connection cannot be resynchronized.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid handshake: expected {expected:#010x}, got {actual:#010x}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("unknown command id: {0}")]
    UnknownCommand(u8),

    #[error("parameter index out of range: {index} (max {max})")]
    ParameterOutOfRange { index: u8, max: usize },

    #[error("port out of range: {0}")]
    PortOutOfRange(u8),

    #[error("audio buffer too large: {count} samples (max {max})")]
    AudioBufferTooLarge { count: u32, max: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the error means the stream is unusable from here on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}
