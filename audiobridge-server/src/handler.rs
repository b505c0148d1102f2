//! Per-connection effect handlers.
//!
//! The parser owns protocol state; everything a decoded command means to the
//! engine is delivered through [`ConnectionHandler`].

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// Receives the effects of one connection's command stream, in stream order.
///
/// Every method defaults to a no-op.
pub trait ConnectionHandler: Send {
    fn on_port(&mut self, _port: u8) {}

    fn on_sample_rate(&mut self, _rate: u32) {}

    /// `value` is the dequantized parameter value in `0.0..=1.0`.
    fn on_parameter(&mut self, _index: u8, _value: f32) {}

    fn on_audio_active(&mut self, _active: bool) {}

    /// A run of interleaved samples belonging to the current AUDIO_PROCESS
    /// frame. A frame may arrive in several runs.
    fn on_audio_samples(&mut self, _samples: &[f32]) {}

    /// The current frame is complete; `samples` is its total length.
    fn on_audio_frame_complete(&mut self, _samples: usize) {}

    /// Called once when the connection ends, for whatever reason.
    fn on_close(&mut self) {}
}

impl<H: ConnectionHandler + ?Sized> ConnectionHandler for Box<H> {
    fn on_port(&mut self, port: u8) {
        (**self).on_port(port)
    }

    fn on_sample_rate(&mut self, rate: u32) {
        (**self).on_sample_rate(rate)
    }

    fn on_parameter(&mut self, index: u8, value: f32) {
        (**self).on_parameter(index, value)
    }

    fn on_audio_active(&mut self, active: bool) {
        (**self).on_audio_active(active)
    }

    fn on_audio_samples(&mut self, samples: &[f32]) {
        (**self).on_audio_samples(samples)
    }

    fn on_audio_frame_complete(&mut self, samples: usize) {
        (**self).on_audio_frame_complete(samples)
    }

    fn on_close(&mut self) {
        (**self).on_close()
    }
}

/// Builds one handler per accepted peer.
pub type HandlerFactory = Arc<dyn Fn(SocketAddr) -> Box<dyn ConnectionHandler> + Send + Sync>;

/// Handler that logs every effect.
pub struct TracingHandler {
    peer: SocketAddr,
}

impl TracingHandler {
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer }
    }

    /// Factory producing a `TracingHandler` per connection.
    pub fn factory() -> HandlerFactory {
        Arc::new(|peer| Box::new(TracingHandler::new(peer)) as Box<dyn ConnectionHandler>)
    }
}

impl ConnectionHandler for TracingHandler {
    fn on_port(&mut self, port: u8) {
        tracing::info!(peer = %self.peer, port, "port set");
    }

    fn on_sample_rate(&mut self, rate: u32) {
        tracing::info!(peer = %self.peer, rate, "sample rate set");
    }

    fn on_parameter(&mut self, index: u8, value: f32) {
        tracing::debug!(peer = %self.peer, index, value, "parameter set");
    }

    fn on_audio_active(&mut self, active: bool) {
        tracing::info!(peer = %self.peer, active, "audio active");
    }

    fn on_audio_frame_complete(&mut self, samples: usize) {
        tracing::trace!(peer = %self.peer, samples, "audio frame");
    }

    fn on_close(&mut self) {
        tracing::debug!(peer = %self.peer, "session closed");
    }
}

/// One effect observed by a [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    Port(u8),
    SampleRate(u32),
    Parameter(u8, f32),
    AudioActive(bool),
    AudioSamples(Vec<f32>),
    AudioFrameComplete(usize),
    Close,
}

/// Handler that appends every effect to a shared log.
///
/// Useful for embedding the server in tools that inspect a session after the
/// fact.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    events: Arc<Mutex<Vec<HandlerEvent>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the events recorded so far.
    pub fn events(&self) -> Vec<HandlerEvent> {
        self.events.lock().clone()
    }

    /// Concatenation of every audio run recorded so far.
    pub fn samples(&self) -> Vec<f32> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                HandlerEvent::AudioSamples(s) => Some(s.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    fn push(&self, event: HandlerEvent) {
        self.events.lock().push(event);
    }
}

impl ConnectionHandler for RecordingHandler {
    fn on_port(&mut self, port: u8) {
        self.push(HandlerEvent::Port(port));
    }

    fn on_sample_rate(&mut self, rate: u32) {
        self.push(HandlerEvent::SampleRate(rate));
    }

    fn on_parameter(&mut self, index: u8, value: f32) {
        self.push(HandlerEvent::Parameter(index, value));
    }

    fn on_audio_active(&mut self, active: bool) {
        self.push(HandlerEvent::AudioActive(active));
    }

    fn on_audio_samples(&mut self, samples: &[f32]) {
        self.push(HandlerEvent::AudioSamples(samples.to_vec()));
    }

    fn on_audio_frame_complete(&mut self, samples: usize) {
        self.push(HandlerEvent::AudioFrameComplete(samples));
    }

    fn on_close(&mut self) {
        self.push(HandlerEvent::Close);
    }
}
