//! # audiobridge-protocol
//!
//! Wire protocol implementation for the audio plugin bridge.
//!
//! This crate provides:
//! - A fixed-capacity byte ring buffer used for outbound and inbound queues
//! - The closed command set and its binary encoding
//! - Incremental decoding that tolerates arbitrary chunk boundaries
//! - Error types and protocol constants
//!
//! Everything here is pure: no sockets, no threads, no locks.

pub mod codec;
pub mod command;
pub mod error;
pub mod ring;

pub use codec::{decode_hello, try_decode_next, Decoder, Encoder};
pub use command::{dequantize, quantize, Command, CommandId, OwnedCommand};
pub use error::ProtocolError;
pub use ring::ByteRingBuffer;

/// Handshake constant sent by the client as the first four bytes of a session.
pub const HELLO_MAGIC: u32 = 0xff00_fefd;

/// Size of the handshake in bytes.
pub const HELLO_LEN: usize = 4;

/// Default loopback port the engine listens on.
pub const DEFAULT_PORT: u16 = 5000;

/// Number of bridged parameters.
pub const NUM_PARAMS: usize = 16;

/// Number of selectable ports (valid ids are `0..NUM_PORTS`).
pub const NUM_PORTS: u8 = 16;

/// Sample rate a fresh session starts with.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Status nibble carried in the first byte of a PARAMETER_SET payload.
pub const PARAMETER_CLASS: u8 = 0xC;

/// Upper bound on the sample count of a single AUDIO_PROCESS frame (1 Mi samples).
pub const MAX_AUDIO_SAMPLES: u32 = 1024 * 1024;
