//! The closed command set and its binary encoding.
//!
//! Every command except HELLO is one id byte followed by its payload. All
//! multi-byte integers and samples are little-endian.
//!
//! ```text
//! HELLO            | magic u32                               (no id byte)
//! QUIT             | 0x02 |
//! PORT_SET         | 0x03 | port u8 |
//! SAMPLE_RATE_SET  | 0x04 | rate u32 |
//! AUDIO_PROCESS    | 0x06 | count u32 | count x f32 |
//! PARAMETER_SET    | 0x07 | class<<4 | index u8 | value u8 |
//! AUDIO_ACTIVATE   | 0x08 |
//! AUDIO_DEACTIVATE | 0x09 |
//! ```

use crate::error::ProtocolError;
use crate::ring::ByteRingBuffer;
use crate::{HELLO_LEN, HELLO_MAGIC, MAX_AUDIO_SAMPLES, NUM_PARAMS, NUM_PORTS, PARAMETER_CLASS};
use bytes::{BufMut, BytesMut};
use std::borrow::Cow;

/// Size of the AUDIO_PROCESS length prefix.
pub const AUDIO_LENGTH_PREFIX: usize = 4;

/// Size of one encoded sample.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// Samples converted per stack chunk when writing audio into a ring buffer.
const SAMPLE_CHUNK: usize = 64;

/// Command identifiers as they appear on the wire.
///
/// Ids 0, 1 and 5 are reserved and rejected by [`CommandId::from_u8`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    Quit = 2,
    PortSet = 3,
    SampleRateSet = 4,
    AudioProcess = 6,
    ParameterSet = 7,
    AudioActivate = 8,
    AudioDeactivate = 9,
}

impl CommandId {
    pub fn from_u8(id: u8) -> Result<Self, ProtocolError> {
        match id {
            2 => Ok(CommandId::Quit),
            3 => Ok(CommandId::PortSet),
            4 => Ok(CommandId::SampleRateSet),
            6 => Ok(CommandId::AudioProcess),
            7 => Ok(CommandId::ParameterSet),
            8 => Ok(CommandId::AudioActivate),
            9 => Ok(CommandId::AudioDeactivate),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Payload size of fixed-size commands; `None` for AUDIO_PROCESS.
    pub fn fixed_payload_len(self) -> Option<usize> {
        match self {
            CommandId::Quit | CommandId::AudioActivate | CommandId::AudioDeactivate => Some(0),
            CommandId::PortSet => Some(1),
            CommandId::ParameterSet => Some(3),
            CommandId::SampleRateSet => Some(4),
            CommandId::AudioProcess => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandId::Quit => "QUIT",
            CommandId::PortSet => "PORT_SET",
            CommandId::SampleRateSet => "SAMPLE_RATE_SET",
            CommandId::AudioProcess => "AUDIO_PROCESS",
            CommandId::ParameterSet => "PARAMETER_SET",
            CommandId::AudioActivate => "AUDIO_ACTIVATE",
            CommandId::AudioDeactivate => "AUDIO_DEACTIVATE",
        }
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Quantizes a normalized parameter value to its 8-bit wire form.
pub fn quantize(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Maps an 8-bit wire value back to `0.0..=1.0`.
pub fn dequantize(value: u8) -> f32 {
    value as f32 / 255.0
}

/// One protocol command.
///
/// AUDIO_PROCESS borrows its samples when encoding from the audio thread and
/// owns them after decoding; see [`OwnedCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command<'a> {
    Hello,
    Quit,
    PortSet(u8),
    SampleRateSet(u32),
    ParameterSet { index: u8, value: u8 },
    AudioActivate,
    AudioDeactivate,
    AudioProcess(Cow<'a, [f32]>),
}

/// A command that owns all of its data, as produced by the decoder.
pub type OwnedCommand = Command<'static>;

impl<'a> Command<'a> {
    /// PARAMETER_SET for a normalized value, quantized to 8 bits.
    pub fn parameter(index: u8, value: f32) -> Self {
        Command::ParameterSet {
            index,
            value: quantize(value),
        }
    }

    /// AUDIO_ACTIVATE or AUDIO_DEACTIVATE.
    pub fn audio_active(active: bool) -> Self {
        if active {
            Command::AudioActivate
        } else {
            Command::AudioDeactivate
        }
    }

    /// AUDIO_PROCESS borrowing the given interleaved samples.
    pub fn audio(samples: &'a [f32]) -> Self {
        Command::AudioProcess(Cow::Borrowed(samples))
    }

    /// Wire id, or `None` for HELLO which has no id byte.
    pub fn id(&self) -> Option<CommandId> {
        match self {
            Command::Hello => None,
            Command::Quit => Some(CommandId::Quit),
            Command::PortSet(_) => Some(CommandId::PortSet),
            Command::SampleRateSet(_) => Some(CommandId::SampleRateSet),
            Command::ParameterSet { .. } => Some(CommandId::ParameterSet),
            Command::AudioActivate => Some(CommandId::AudioActivate),
            Command::AudioDeactivate => Some(CommandId::AudioDeactivate),
            Command::AudioProcess(_) => Some(CommandId::AudioProcess),
        }
    }

    /// Whether this is an audio frame no decoder will accept.
    pub fn exceeds_audio_limit(&self) -> bool {
        matches!(self, Command::AudioProcess(samples) if samples.len() > MAX_AUDIO_SAMPLES as usize)
    }

    /// Number of bytes [`Command::encode`] writes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Hello => HELLO_LEN,
            Command::AudioProcess(samples) => {
                1 + AUDIO_LENGTH_PREFIX + samples.len() * SAMPLE_SIZE
            }
            other => 1 + other.id().and_then(CommandId::fixed_payload_len).unwrap_or(0),
        }
    }

    /// Appends the encoded command to `buf`.
    ///
    /// Frames past [`MAX_AUDIO_SAMPLES`] are written as given; callers check
    /// [`Command::exceeds_audio_limit`] first.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        match self {
            Command::AudioProcess(samples) => {
                buf.put_u8(CommandId::AudioProcess.as_u8());
                buf.put_u32_le(samples.len() as u32);
                for sample in samples.iter() {
                    buf.put_f32_le(*sample);
                }
            }
            fixed => {
                let (bytes, len) = fixed.encode_fixed();
                buf.put_slice(&bytes[..len]);
            }
        }
    }

    /// Encodes the command straight into a ring buffer.
    ///
    /// All-or-nothing: returns `false` and writes nothing if the whole
    /// command does not fit, or if it is an audio frame longer than
    /// [`MAX_AUDIO_SAMPLES`]. Never allocates, so it is usable from the
    /// real-time thread.
    pub fn encode_into(&self, ring: &mut ByteRingBuffer) -> bool {
        if self.exceeds_audio_limit() || self.encoded_len() > ring.free() {
            return false;
        }
        match self {
            Command::AudioProcess(samples) => {
                let mut header = [0u8; 1 + AUDIO_LENGTH_PREFIX];
                header[0] = CommandId::AudioProcess.as_u8();
                header[1..].copy_from_slice(&(samples.len() as u32).to_le_bytes());
                ring.push(&header);

                let mut chunk = [0u8; SAMPLE_CHUNK * SAMPLE_SIZE];
                for block in samples.chunks(SAMPLE_CHUNK) {
                    for (dst, sample) in chunk.chunks_exact_mut(SAMPLE_SIZE).zip(block) {
                        dst.copy_from_slice(&sample.to_le_bytes());
                    }
                    ring.push(&chunk[..block.len() * SAMPLE_SIZE]);
                }
                true
            }
            fixed => {
                let (bytes, len) = fixed.encode_fixed();
                ring.push(&bytes[..len])
            }
        }
    }

    /// Encodes any command but AUDIO_PROCESS into a small stack buffer.
    fn encode_fixed(&self) -> ([u8; 8], usize) {
        let mut out = [0u8; 8];
        let len = match self {
            Command::Hello => {
                out[..HELLO_LEN].copy_from_slice(&HELLO_MAGIC.to_le_bytes());
                HELLO_LEN
            }
            Command::Quit => {
                out[0] = CommandId::Quit.as_u8();
                1
            }
            Command::PortSet(port) => {
                out[0] = CommandId::PortSet.as_u8();
                out[1] = *port;
                2
            }
            Command::SampleRateSet(rate) => {
                out[0] = CommandId::SampleRateSet.as_u8();
                out[1..5].copy_from_slice(&rate.to_le_bytes());
                5
            }
            Command::ParameterSet { index, value } => {
                out[0] = CommandId::ParameterSet.as_u8();
                out[1] = PARAMETER_CLASS << 4;
                out[2] = *index;
                out[3] = *value;
                4
            }
            Command::AudioActivate => {
                out[0] = CommandId::AudioActivate.as_u8();
                1
            }
            Command::AudioDeactivate => {
                out[0] = CommandId::AudioDeactivate.as_u8();
                1
            }
            Command::AudioProcess(_) => 0,
        };
        (out, len)
    }

    /// Decodes the payload of a fixed-size command.
    ///
    /// `payload` must be exactly `id.fixed_payload_len()` bytes long.
    pub fn decode_fixed(id: CommandId, payload: &[u8]) -> Result<OwnedCommand, ProtocolError> {
        debug_assert_eq!(Some(payload.len()), id.fixed_payload_len());
        let command = match id {
            CommandId::Quit => Command::Quit,
            CommandId::AudioActivate => Command::AudioActivate,
            CommandId::AudioDeactivate => Command::AudioDeactivate,
            CommandId::PortSet => {
                let port = payload[0];
                if port >= NUM_PORTS {
                    return Err(ProtocolError::PortOutOfRange(port));
                }
                Command::PortSet(port)
            }
            CommandId::SampleRateSet => {
                let rate = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                Command::SampleRateSet(rate)
            }
            CommandId::ParameterSet => {
                let index = payload[1];
                if index as usize >= NUM_PARAMS {
                    return Err(ProtocolError::ParameterOutOfRange {
                        index,
                        max: NUM_PARAMS,
                    });
                }
                Command::ParameterSet {
                    index,
                    value: payload[2],
                }
            }
            CommandId::AudioProcess => {
                unreachable!("AUDIO_PROCESS has no fixed payload")
            }
        };
        Ok(command)
    }

    /// Validates an AUDIO_PROCESS length prefix.
    pub fn check_audio_count(count: u32) -> Result<usize, ProtocolError> {
        if count > MAX_AUDIO_SAMPLES {
            return Err(ProtocolError::AudioBufferTooLarge {
                count,
                max: MAX_AUDIO_SAMPLES,
            });
        }
        Ok(count as usize)
    }

    /// Converts borrowed audio into an owned command.
    pub fn into_owned(self) -> OwnedCommand {
        match self {
            Command::Hello => Command::Hello,
            Command::Quit => Command::Quit,
            Command::PortSet(p) => Command::PortSet(p),
            Command::SampleRateSet(r) => Command::SampleRateSet(r),
            Command::ParameterSet { index, value } => Command::ParameterSet { index, value },
            Command::AudioActivate => Command::AudioActivate,
            Command::AudioDeactivate => Command::AudioDeactivate,
            Command::AudioProcess(samples) => Command::AudioProcess(Cow::Owned(samples.into_owned())),
        }
    }
}
