//! Incremental encoding and decoding of the command stream.
//!
//! Decoding never consumes a partial command: callers hand in whatever bytes
//! they have, get `Ok(None)` if the next command is incomplete, and retry
//! once more bytes have arrived. That is what makes parsing independent of
//! how the transport chunks the stream.

use crate::command::{Command, CommandId, OwnedCommand, AUDIO_LENGTH_PREFIX, SAMPLE_SIZE};
use crate::error::ProtocolError;
use crate::{HELLO_LEN, HELLO_MAGIC};
use bytes::{Buf, BytesMut};
use std::borrow::Cow;

/// Validates the handshake at the front of `buf`.
///
/// Returns `Ok(Some(HELLO_LEN))` when the magic is present, `Ok(None)` when
/// fewer than four bytes are buffered.
pub fn decode_hello(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < HELLO_LEN {
        return Ok(None);
    }
    let actual = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if actual != HELLO_MAGIC {
        return Err(ProtocolError::InvalidMagic {
            expected: HELLO_MAGIC,
            actual,
        });
    }
    Ok(Some(HELLO_LEN))
}

/// Decodes the next command at the front of `buf`.
///
/// Returns the command together with the number of bytes it occupied, or
/// `Ok(None)` if the command is not yet complete. An unknown id is reported
/// as soon as the id byte is present.
pub fn try_decode_next(buf: &[u8]) -> Result<Option<(OwnedCommand, usize)>, ProtocolError> {
    let Some(&id_byte) = buf.first() else {
        return Ok(None);
    };
    let id = CommandId::from_u8(id_byte)?;

    match id.fixed_payload_len() {
        Some(len) => {
            if buf.len() < 1 + len {
                return Ok(None);
            }
            let command = Command::decode_fixed(id, &buf[1..1 + len])?;
            Ok(Some((command, 1 + len)))
        }
        None => {
            let header = 1 + AUDIO_LENGTH_PREFIX;
            if buf.len() < header {
                return Ok(None);
            }
            let count = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
            let count = Command::check_audio_count(count)?;
            let total = header + count * SAMPLE_SIZE;
            if buf.len() < total {
                return Ok(None);
            }
            let samples = buf[header..total]
                .chunks_exact(SAMPLE_SIZE)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect::<Vec<_>>();
            Ok(Some((Command::AudioProcess(Cow::Owned(samples)), total)))
        }
    }
}

/// Encodes commands into contiguous byte buffers.
pub struct Encoder;

impl Encoder {
    /// Encodes a single command.
    pub fn encode(command: &Command<'_>) -> BytesMut {
        let mut buf = BytesMut::with_capacity(command.encoded_len());
        command.encode(&mut buf);
        buf
    }

    /// Encodes a sequence of commands back to back.
    pub fn encode_all<'a, 'b: 'a, I>(commands: I) -> BytesMut
    where
        I: IntoIterator<Item = &'a Command<'b>>,
    {
        let mut buf = BytesMut::new();
        for command in commands {
            command.encode(&mut buf);
        }
        buf
    }
}

/// Stream decoder for a whole session: the handshake followed by commands.
///
/// The first successful decode yields [`Command::Hello`]; after that every
/// call yields the next command in stream order.
pub struct Decoder {
    buffer: BytesMut,
    hello_seen: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            hello_seen: false,
        }
    }

    /// Creates a decoder for a stream whose handshake was already consumed.
    pub fn after_hello() -> Self {
        Self {
            hello_seen: true,
            ..Self::new()
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next item from the buffer.
    pub fn decode_next(&mut self) -> Result<Option<OwnedCommand>, ProtocolError> {
        if !self.hello_seen {
            return match decode_hello(&self.buffer)? {
                Some(len) => {
                    self.buffer.advance(len);
                    self.hello_seen = true;
                    Ok(Some(Command::Hello))
                }
                None => Ok(None),
            };
        }

        match try_decode_next(&self.buffer)? {
            Some((command, len)) => {
                self.buffer.advance(len);
                Ok(Some(command))
            }
            None => Ok(None),
        }
    }

    /// Decodes every complete item currently buffered.
    pub fn decode_all(&mut self) -> Result<Vec<OwnedCommand>, ProtocolError> {
        let mut out = Vec::new();
        while let Some(command) = self.decode_next()? {
            out.push(command);
        }
        Ok(out)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer and expects a new handshake.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.hello_seen = false;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
