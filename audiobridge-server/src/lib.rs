//! # audiobridge-server
//!
//! Engine-side TCP server for the audio plugin bridge.
//!
//! This crate provides:
//! - A per-connection parsing state machine that tolerates arbitrary read sizes
//! - Handler traits that receive port, sample rate, parameter and audio effects
//! - An accept loop with a connection limit and broadcast shutdown
//! - YAML + environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, NetworkConfig, ProtocolConfig};
pub use connection::{BridgeServerConnection, ParseState, Progress};
pub use error::ServerError;
pub use handler::{ConnectionHandler, HandlerEvent, HandlerFactory, RecordingHandler, TracingHandler};
pub use server::{Server, ServerConfig, ServerStats};
pub use session::ConnectionState;
