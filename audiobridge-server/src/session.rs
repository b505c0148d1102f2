//! Per-connection session state as seen by the engine.

use audiobridge_protocol::NUM_PARAMS;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// What the engine knows about one connected plugin instance.
///
/// Port and sample rate stay `None` until the client sends them; a healthy
/// client sends both right after the handshake.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub remote_addr: Option<SocketAddr>,
    pub port: Option<u8>,
    pub sample_rate: Option<u32>,
    pub params: [f32; NUM_PARAMS],
    pub audio_active: bool,
    /// Commands applied since the handshake, audio frames included.
    pub commands_applied: u64,
    pub audio_frames: u64,
    pub audio_samples: u64,
    created_at: Instant,
}

impl ConnectionState {
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            remote_addr,
            port: None,
            sample_rate: None,
            params: [0.0; NUM_PARAMS],
            audio_active: false,
            commands_applied: 0,
            audio_frames: 0,
            audio_samples: 0,
            created_at: Instant::now(),
        }
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new(None)
    }
}
