//! # audiobridge-client
//!
//! Host-side client for the audio plugin bridge.
//!
//! This crate provides:
//! - [`BridgeClient`], owned by one plugin instance
//! - A background IO thread that connects, resyncs and drains the outbound queue
//! - Real-time safe `process_audio` that never touches the socket
//! - Automatic reconnection with a fixed retry delay
//!
//! ```no_run
//! use audiobridge_client::{BridgeClient, ClientConfig};
//!
//! let client = BridgeClient::new(ClientConfig::default())?;
//! client.set_sample_rate(48_000);
//! client.set_param(0, 0.5);
//!
//! let input = [0.0f32; 2 * 256];
//! let mut output = [0.0f32; 2 * 256];
//! client.process_audio(&input, &mut output, 256);
//! # Ok::<(), audiobridge_client::ClientError>(())
//! ```

pub mod client;
pub mod config;
mod connection;
pub mod error;
pub mod session;

pub use client::{BridgeClient, ClientStats, LinkState};
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::SessionState;
