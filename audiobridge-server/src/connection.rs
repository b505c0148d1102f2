//! Server-side parser for one bridge connection.
//!
//! Bytes arrive in arbitrary chunks through [`BridgeServerConnection::feed`]
//! and are parsed by an explicit state machine:
//!
//! ```text
//! AwaitingPassword --magic--> Idle --id--> AwaitingPayload(id) --payload--> Idle
//!                              |  \
//!                              |   +--AUDIO_PROCESS--> AwaitingAudioBufferLength
//!                              |                          |
//!                              |                          v
//!                              +<--remaining == 0-- ReceivingAudioBuffer
//!
//! any violation, QUIT or close() --> Closed
//! ```
//!
//! A short read never resets the cursor: the state only advances once the
//! bytes it needs are buffered.

use crate::error::ServerError;
use crate::handler::ConnectionHandler;
use crate::session::ConnectionState;
use audiobridge_protocol::command::{AUDIO_LENGTH_PREFIX, SAMPLE_SIZE};
use audiobridge_protocol::{
    decode_hello, dequantize, ByteRingBuffer, Command, CommandId, ProtocolError, HELLO_LEN,
};
use std::net::SocketAddr;

/// Largest fixed payload (SAMPLE_RATE_SET).
const MAX_FIXED_PAYLOAD: usize = 4;

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Waiting for the 4-byte handshake constant.
    AwaitingPassword,
    /// Waiting for the next command id.
    Idle,
    /// Id read; waiting for its fixed-size payload.
    AwaitingPayload(CommandId),
    /// AUDIO_PROCESS id read; waiting for the sample count.
    AwaitingAudioBufferLength,
    /// Streaming samples of the current audio frame.
    ReceivingAudioBuffer { remaining: usize },
    /// Terminal.
    Closed,
}

/// Result of a single [`BridgeServerConnection::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The state advanced; stepping again may advance further.
    Advanced,
    /// More bytes are needed, or the connection is closed.
    Stalled,
}

/// Parser and session for one accepted socket.
pub struct BridgeServerConnection<H: ConnectionHandler = Box<dyn ConnectionHandler>> {
    queue: ByteRingBuffer,
    state: ParseState,
    session: ConnectionState,
    handler: H,
    /// Samples of the current frame delivered so far.
    frame_samples: usize,
    raw: Vec<u8>,
    samples: Vec<f32>,
}

impl<H: ConnectionHandler> BridgeServerConnection<H> {
    pub fn new(handler: H, queue_capacity: usize) -> Self {
        Self::with_peer(handler, queue_capacity, None)
    }

    pub fn with_peer(handler: H, queue_capacity: usize, peer: Option<SocketAddr>) -> Self {
        Self {
            queue: ByteRingBuffer::with_capacity(queue_capacity),
            state: ParseState::AwaitingPassword,
            session: ConnectionState::new(peer),
            handler,
            frame_samples: 0,
            raw: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn session(&self) -> &ConnectionState {
        &self.session
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn is_closed(&self) -> bool {
        self.state == ParseState::Closed
    }

    /// Bytes that can be fed before the receive queue is full.
    pub fn free(&self) -> usize {
        self.queue.free()
    }

    /// Bytes received but not yet parsed.
    pub fn buffered(&self) -> usize {
        self.queue.size()
    }

    /// Appends received bytes to the queue. Parses nothing.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        if !self.queue.push(data) {
            return Err(ServerError::QueueOverflow {
                needed: data.len(),
                free: self.queue.free(),
            });
        }
        Ok(())
    }

    /// Steps until no further progress is possible or the connection closes.
    ///
    /// A protocol violation closes the connection and is returned.
    pub fn process(&mut self) -> Result<(), ServerError> {
        while self.step()? == Progress::Advanced {}
        Ok(())
    }

    /// Advances the state machine by at most one transition.
    pub fn step(&mut self) -> Result<Progress, ServerError> {
        match self.advance() {
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Ends the session and notifies the handler. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.state = ParseState::Closed;
        self.handler.on_close();
    }

    fn advance(&mut self) -> Result<Progress, ProtocolError> {
        match self.state {
            ParseState::Closed => Ok(Progress::Stalled),

            ParseState::AwaitingPassword => {
                let mut magic = [0u8; HELLO_LEN];
                if !self.queue.pop_into(&mut magic) {
                    return Ok(Progress::Stalled);
                }
                decode_hello(&magic)?;
                self.state = ParseState::Idle;
                Ok(Progress::Advanced)
            }

            ParseState::Idle => {
                let mut id = [0u8; 1];
                if !self.queue.pop_into(&mut id) {
                    return Ok(Progress::Stalled);
                }
                let id = CommandId::from_u8(id[0])?;
                match id.fixed_payload_len() {
                    Some(0) => self.apply(Command::decode_fixed(id, &[])?),
                    Some(_) => self.state = ParseState::AwaitingPayload(id),
                    None => self.state = ParseState::AwaitingAudioBufferLength,
                }
                Ok(Progress::Advanced)
            }

            ParseState::AwaitingPayload(id) => {
                let len = id.fixed_payload_len().unwrap_or(0);
                let mut payload = [0u8; MAX_FIXED_PAYLOAD];
                if !self.queue.pop_into(&mut payload[..len]) {
                    return Ok(Progress::Stalled);
                }
                self.state = ParseState::Idle;
                self.apply(Command::decode_fixed(id, &payload[..len])?);
                Ok(Progress::Advanced)
            }

            ParseState::AwaitingAudioBufferLength => {
                let mut prefix = [0u8; AUDIO_LENGTH_PREFIX];
                if !self.queue.pop_into(&mut prefix) {
                    return Ok(Progress::Stalled);
                }
                let count = Command::check_audio_count(u32::from_le_bytes(prefix))?;
                self.frame_samples = 0;
                if count == 0 {
                    self.finish_frame();
                } else {
                    self.state = ParseState::ReceivingAudioBuffer { remaining: count };
                }
                Ok(Progress::Advanced)
            }

            ParseState::ReceivingAudioBuffer { remaining } => {
                let n = (self.queue.size() / SAMPLE_SIZE).min(remaining);
                if n == 0 {
                    return Ok(Progress::Stalled);
                }

                self.raw.resize(n * SAMPLE_SIZE, 0);
                self.queue.pop_into(&mut self.raw);
                self.samples.clear();
                self.samples.extend(
                    self.raw
                        .chunks_exact(SAMPLE_SIZE)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                );
                self.handler.on_audio_samples(&self.samples);
                self.frame_samples += n;
                self.session.audio_samples += n as u64;

                if remaining == n {
                    self.finish_frame();
                } else {
                    self.state = ParseState::ReceivingAudioBuffer {
                        remaining: remaining - n,
                    };
                }
                Ok(Progress::Advanced)
            }
        }
    }

    fn finish_frame(&mut self) {
        self.state = ParseState::Idle;
        self.session.audio_frames += 1;
        self.session.commands_applied += 1;
        self.handler.on_audio_frame_complete(self.frame_samples);
        self.frame_samples = 0;
    }

    fn apply(&mut self, command: Command<'_>) {
        self.session.commands_applied += 1;
        match command {
            Command::Quit => {
                tracing::debug!(peer = ?self.session.remote_addr, "QUIT received");
                self.close();
            }
            Command::PortSet(port) => {
                self.session.port = Some(port);
                self.handler.on_port(port);
            }
            Command::SampleRateSet(rate) => {
                self.session.sample_rate = Some(rate);
                self.handler.on_sample_rate(rate);
            }
            Command::ParameterSet { index, value } => {
                let value = dequantize(value);
                self.session.params[index as usize] = value;
                self.handler.on_parameter(index, value);
            }
            Command::AudioActivate | Command::AudioDeactivate => {
                let active = matches!(command, Command::AudioActivate);
                self.session.audio_active = active;
                self.handler.on_audio_active(active);
            }
            // only produced by the stream decoder, never by decode_fixed
            Command::Hello | Command::AudioProcess(_) => {}
        }
    }
}

impl<H: ConnectionHandler> std::fmt::Debug for BridgeServerConnection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServerConnection")
            .field("state", &self.state)
            .field("buffered", &self.queue.size())
            .field("session", &self.session)
            .finish()
    }
}
