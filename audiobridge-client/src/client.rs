//! High-level client API.

use crate::config::ClientConfig;
use crate::connection;
use crate::error::ClientError;
use crate::session::SessionState;
use audiobridge_protocol::{ByteRingBuffer, Command};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Link state of the background connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Socket open, HELLO and the session snapshot not yet queued. Short-lived.
    Handshaking,
    Ready,
}

/// Point-in-time copy of the client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Connection attempts, successful or not.
    pub connect_attempts: u64,
    /// Sessions that completed the handshake.
    pub sessions: u64,
    /// Bytes written to the socket.
    pub bytes_sent: u64,
    /// Commands dropped because the outbound queue was full.
    pub dropped_pushes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub connect_attempts: AtomicU64,
    pub sessions: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub dropped_pushes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            sessions: self.sessions.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            dropped_pushes: self.dropped_pushes.load(Ordering::Relaxed),
        }
    }
}

/// State guarded by the client lock.
#[derive(Debug)]
pub(crate) struct Inner {
    pub session: SessionState,
    pub queue: ByteRingBuffer,
    pub link: LinkState,
    /// A push was dropped; the current connection must be torn down.
    pub degraded: bool,
    pub stop: bool,
}

impl Inner {
    pub fn is_ready(&self) -> bool {
        self.link == LinkState::Ready && !self.degraded
    }
}

/// State shared between the caller threads and the IO thread.
pub(crate) struct Shared {
    pub inner: Mutex<Inner>,
    /// Wakes the IO thread early: data queued, degraded or stop requested.
    pub wake: Condvar,
    pub counters: Counters,
    pub config: ClientConfig,
}

/// Bridge client owned by one plugin instance.
///
/// Control calls (`set_*`) and `process_audio` only touch in-memory state
/// and the outbound queue. All socket work happens on a dedicated IO thread
/// that connects, replays the session after every (re)connect and drains the
/// queue.
pub struct BridgeClient {
    shared: Arc<Shared>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeClient {
    /// Creates a client with a default session and starts its IO thread.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Self::with_session(config, SessionState::default())
    }

    /// Creates a client whose first handshake replays `session`.
    ///
    /// Out-of-range fields are repaired first (see [`SessionState::sanitized`])
    /// and the config is re-bounded, so caller input can never produce a
    /// handshake the engine rejects.
    pub fn with_session(config: ClientConfig, session: SessionState) -> Result<Self, ClientError> {
        let config = config.normalized();
        if !SessionState::valid_port(session.port) {
            tracing::warn!(port = session.port, "out-of-range port in initial session, using 0");
        }
        let session = session.sanitized();

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                session,
                queue: ByteRingBuffer::with_capacity(config.queue_capacity),
                link: LinkState::Disconnected,
                degraded: false,
                stop: false,
            }),
            wake: Condvar::new(),
            counters: Counters::default(),
            config,
        });

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name("audiobridge-io".to_string())
            .spawn(move || connection::run(worker))
            .map_err(ClientError::ThreadSpawn)?;

        Ok(Self {
            shared,
            io_thread: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Selects the engine port. Ids outside `0..16` are ignored.
    pub fn set_port(&self, port: u8) {
        if !SessionState::valid_port(port) {
            tracing::warn!(port, "ignoring out-of-range port");
            return;
        }
        self.update(|session| session.set_port(port));
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.update(|session| session.set_sample_rate(rate));
    }

    /// Sets a normalized parameter value, clamped to `0.0..=1.0`.
    pub fn set_param(&self, index: usize, value: f32) {
        if !SessionState::valid_param(index) {
            tracing::warn!(index, "ignoring out-of-range parameter index");
            return;
        }
        self.update(|session| session.set_param(index, value));
    }

    pub fn set_audio_active(&self, active: bool) {
        self.update(|session| session.set_audio_active(active));
    }

    /// Applies a session change and, when connected, enqueues the command
    /// that carries it. While disconnected only the local state changes; the
    /// next handshake replays it.
    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut SessionState) -> Option<Command<'static>>,
    {
        let mut inner = self.shared.inner.lock();
        let Some(command) = apply(&mut inner.session) else {
            return;
        };
        if !inner.is_ready() {
            return;
        }
        if !self.enqueue(&mut inner, &command) {
            tracing::warn!(
                command = ?command.id(),
                "outbound queue full, dropping command and resyncing"
            );
        }
        drop(inner);
        self.shared.wake.notify_one();
    }

    fn enqueue(&self, inner: &mut Inner, command: &Command<'_>) -> bool {
        if command.encode_into(&mut inner.queue) {
            return true;
        }
        inner.degraded = true;
        self.shared
            .counters
            .dropped_pushes
            .fetch_add(1, Ordering::Relaxed);
        false
    }

    // =========================================================================
    // Audio
    // =========================================================================

    /// Hands one block of interleaved audio to the engine.
    ///
    /// `output[..frames * channels]` is always zeroed. When the link is ready
    /// the first `frames * channels` input samples are enqueued as a single
    /// AUDIO_PROCESS frame. Never blocks on the network and never logs.
    /// Returns whether the block was enqueued.
    ///
    /// A block longer than [`audiobridge_protocol::MAX_AUDIO_SAMPLES`] is never sent, since the engine
    /// would reject the frame and drop the session; it is skipped without
    /// degrading the link.
    pub fn process_audio(&self, input: &[f32], output: &mut [f32], frames: usize) -> bool {
        let samples = frames.saturating_mul(self.shared.config.channels);
        let out_len = samples.min(output.len());
        output[..out_len].fill(0.0);

        let command = Command::audio(&input[..samples.min(input.len())]);
        if command.exceeds_audio_limit() {
            return false;
        }
        let mut inner = self.shared.inner.lock();
        if !inner.is_ready() {
            return false;
        }
        let queued = self.enqueue(&mut inner, &command);
        drop(inner);
        self.shared.wake.notify_one();
        queued
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Drops the current connection; the IO thread reconnects and resyncs.
    pub fn request_reconnect(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.link == LinkState::Ready {
            inner.degraded = true;
        }
        drop(inner);
        self.shared.wake.notify_one();
    }

    /// Stops the IO thread and waits for it to exit.
    ///
    /// A ready connection is flushed and closed with QUIT. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.stop = true;
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.io_thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("IO thread panicked");
            }
        }
    }

    // =========================================================================
    // Observability
    // =========================================================================

    pub fn link_state(&self) -> LinkState {
        self.shared.inner.lock().link
    }

    /// Returns whether pushes are currently forwarded to the engine.
    pub fn is_ready(&self) -> bool {
        self.shared.inner.lock().is_ready()
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.inner.lock().degraded
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.counters.snapshot()
    }

    pub fn port(&self) -> u8 {
        self.shared.inner.lock().session.port
    }

    pub fn sample_rate(&self) -> u32 {
        self.shared.inner.lock().session.sample_rate
    }

    /// Returns the value of parameter `index`, or `None` if out of range.
    pub fn param(&self, index: usize) -> Option<f32> {
        self.shared.inner.lock().session.params.get(index).copied()
    }

    pub fn audio_active(&self) -> bool {
        self.shared.inner.lock().session.audio_active
    }

    /// Returns a copy of the whole session state.
    pub fn session(&self) -> SessionState {
        self.shared.inner.lock().session.clone()
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_QUEUE_CAPACITY, MIN_QUEUE_CAPACITY};
    use audiobridge_protocol::{Decoder, OwnedCommand, MAX_AUDIO_SAMPLES, NUM_PARAMS};
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};
    use std::time::{Duration, Instant};

    const HANDSHAKE_COMMANDS: usize = 1 + 1 + NUM_PARAMS + 2;

    fn test_config(listener: &TcpListener) -> ClientConfig {
        ClientConfig::new(listener.local_addr().unwrap())
            .with_retry_delay(Duration::from_millis(50))
            .with_flush_interval(Duration::from_millis(5))
    }

    /// Reads until `count` commands are decoded or `timeout` passes.
    fn read_commands(
        stream: &mut TcpStream,
        decoder: &mut Decoder,
        count: usize,
        timeout: Duration,
    ) -> Vec<OwnedCommand> {
        let deadline = Instant::now() + timeout;
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        while out.len() < count && Instant::now() < deadline {
            out.extend(decoder.decode_all().unwrap());
            if out.len() >= count {
                break;
            }
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => panic!("read failed: {e}"),
            }
        }
        out.extend(decoder.decode_all().unwrap());
        out
    }

    fn accept_session(listener: &TcpListener) -> (TcpStream, Decoder, Vec<OwnedCommand>) {
        let (mut stream, _) = listener.accept().unwrap();
        let mut decoder = Decoder::new();
        let commands = read_commands(
            &mut stream,
            &mut decoder,
            HANDSHAKE_COMMANDS,
            Duration::from_secs(5),
        );
        (stream, decoder, commands)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn apply(session: &mut SessionState, commands: &[OwnedCommand]) {
        for command in commands {
            match command {
                Command::PortSet(p) => session.port = *p,
                Command::SampleRateSet(r) => session.sample_rate = *r,
                Command::AudioActivate => session.audio_active = true,
                Command::AudioDeactivate => session.audio_active = false,
                _ => {}
            }
        }
    }

    #[test]
    fn test_handshake_replays_session() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut session = SessionState {
            port: 3,
            sample_rate: 48_000,
            ..Default::default()
        };
        session.params[0] = 0.5;
        let client = BridgeClient::with_session(test_config(&listener), session).unwrap();

        let (_stream, _decoder, commands) = accept_session(&listener);
        assert_eq!(commands.len(), HANDSHAKE_COMMANDS);
        assert_eq!(commands[0], Command::Hello);
        assert_eq!(commands[1], Command::PortSet(3));
        for (i, command) in commands[2..2 + NUM_PARAMS].iter().enumerate() {
            let value = if i == 0 { 128 } else { 0 };
            assert_eq!(
                command,
                &Command::ParameterSet {
                    index: i as u8,
                    value
                }
            );
        }
        assert_eq!(commands[2 + NUM_PARAMS], Command::SampleRateSet(48_000));
        assert_eq!(commands[3 + NUM_PARAMS], Command::AudioDeactivate);

        assert!(wait_for(|| client.is_ready()));
        assert_eq!(client.stats().sessions, 1);
    }

    #[test]
    fn test_invalid_initial_session_is_repaired() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut session = SessionState {
            port: 16,
            ..Default::default()
        };
        session.params[3] = 5.0;
        let client = BridgeClient::with_session(test_config(&listener), session).unwrap();
        assert_eq!(client.port(), 0);
        assert_eq!(client.param(3), Some(1.0));

        let (_stream, _decoder, commands) = accept_session(&listener);
        assert_eq!(commands.len(), HANDSHAKE_COMMANDS);
        assert_eq!(commands[1], Command::PortSet(0));
        assert_eq!(commands[5], Command::ParameterSet { index: 3, value: 255 });
        assert!(wait_for(|| client.is_ready()));
        assert_eq!(client.stats().sessions, 1);
    }

    #[test]
    fn test_literal_config_is_rebounded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ClientConfig {
            queue_capacity: 0,
            channels: 0,
            ..test_config(&listener)
        };
        let client = BridgeClient::new(config).unwrap();
        assert_eq!(client.config().queue_capacity, MIN_QUEUE_CAPACITY);
        assert_eq!(client.config().channels, 1);

        let (_stream, _decoder, commands) = accept_session(&listener);
        assert_eq!(commands.len(), HANDSHAKE_COMMANDS);
        assert!(wait_for(|| client.is_ready()));
    }

    #[test]
    fn test_updates_while_ready_are_forwarded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let (mut stream, mut decoder, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        client.set_param(2, 0.25);
        client.set_port(9);
        client.set_sample_rate(96_000);
        client.set_audio_active(true);

        let commands = read_commands(&mut stream, &mut decoder, 4, Duration::from_secs(5));
        assert_eq!(
            commands,
            vec![
                Command::ParameterSet { index: 2, value: 64 },
                Command::PortSet(9),
                Command::SampleRateSet(96_000),
                Command::AudioActivate,
            ]
        );
    }

    #[test]
    fn test_duplicate_updates_coalesce() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let (mut stream, mut decoder, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        client.set_sample_rate(48_000);
        client.set_sample_rate(48_000);
        client.set_param(1, 0.0);
        // marker that everything before it has been flushed
        client.set_port(1);

        let commands = read_commands(&mut stream, &mut decoder, 3, Duration::from_millis(500));
        assert_eq!(
            commands,
            vec![Command::SampleRateSet(48_000), Command::PortSet(1)]
        );
    }

    #[test]
    fn test_out_of_range_updates_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();

        client.set_port(16);
        client.set_param(NUM_PARAMS, 1.0);
        client.set_param(0, 4.0);
        client.set_param(1, f32::NAN);

        assert_eq!(client.port(), 0);
        assert_eq!(client.param(0), Some(1.0));
        assert_eq!(client.param(1), Some(0.0));
        assert_eq!(client.param(NUM_PARAMS), None);
    }

    #[test]
    fn test_process_audio_enqueues_block() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let (mut stream, mut decoder, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        let input: Vec<f32> = (0..8).map(|i| i as f32 * 0.125).collect();
        let mut output = vec![9.0f32; 10];
        assert!(client.process_audio(&input, &mut output, 4));
        assert_eq!(&output[..8], &[0.0; 8]);
        assert_eq!(&output[8..], &[9.0, 9.0]);

        let commands = read_commands(&mut stream, &mut decoder, 1, Duration::from_secs(5));
        assert_eq!(commands, vec![Command::audio(&input).into_owned()]);
    }

    #[test]
    fn test_process_audio_rejects_frames_past_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = test_config(&listener)
            .with_queue_capacity(MAX_QUEUE_CAPACITY)
            .with_channels(1);
        let client = BridgeClient::new(config).unwrap();
        let (_stream, _, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        let limit = MAX_AUDIO_SAMPLES as usize;
        let input = vec![0.25f32; limit + 1];
        let mut output = vec![1.0f32; limit + 1];

        assert!(!client.process_audio(&input, &mut output, limit + 1));
        assert!(output.iter().all(|s| *s == 0.0));
        assert!(!client.is_degraded());
        assert!(client.is_ready());
        assert_eq!(client.stats().dropped_pushes, 0);

        assert!(client.process_audio(&input[..limit], &mut output, limit));
    }

    #[test]
    fn test_process_audio_while_disconnected() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let config = ClientConfig::new(addr).with_retry_delay(Duration::from_millis(20));
        let client = BridgeClient::new(config).unwrap();
        assert!(wait_for(|| client.stats().connect_attempts >= 2));
        assert!(!client.is_ready());

        let input = [0.5f32; 4];
        let mut output = [1.0f32; 4];
        assert!(!client.process_audio(&input, &mut output, 2));
        assert_eq!(output, [0.0; 4]);

        // state changes while disconnected are kept locally
        client.set_sample_rate(22_050);
        assert_eq!(client.sample_rate(), 22_050);
    }

    #[test]
    fn test_reconnect_resyncs_latest_state() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();

        let (stream, _, first) = accept_session(&listener);
        assert_eq!(first.len(), HANDSHAKE_COMMANDS);
        assert!(wait_for(|| client.is_ready()));
        drop(stream);

        client.set_sample_rate(96_000);
        client.set_port(7);
        client.set_audio_active(true);

        let (mut stream, mut decoder, second) = accept_session(&listener);
        assert_eq!(second.len(), HANDSHAKE_COMMANDS);
        assert_eq!(second[0], Command::Hello);
        assert!(matches!(second[1], Command::PortSet(_)));
        assert!(second[2..2 + NUM_PARAMS]
            .iter()
            .all(|c| matches!(c, Command::ParameterSet { .. })));
        assert!(matches!(second[2 + NUM_PARAMS], Command::SampleRateSet(_)));

        // updates racing the reconnect may follow the snapshot
        let extra = read_commands(&mut stream, &mut decoder, 3, Duration::from_millis(300));
        let mut observed = SessionState::default();
        apply(&mut observed, &second);
        apply(&mut observed, &extra);
        assert_eq!(observed.port, 7);
        assert_eq!(observed.sample_rate, 96_000);
        assert!(observed.audio_active);

        assert!(wait_for(|| client.stats().sessions == 2));
    }

    #[test]
    fn test_queue_overflow_forces_resync() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = test_config(&listener).with_queue_capacity(1024);
        let client = BridgeClient::new(config).unwrap();
        let (_stream, _, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        // 2 channels x 200 frames does not fit a 1 KiB queue
        let input = vec![0.1f32; 400];
        let mut output = vec![0.0f32; 400];
        assert!(!client.process_audio(&input, &mut output, 200));
        assert_eq!(client.stats().dropped_pushes, 1);

        let (_stream, _, resync) = accept_session(&listener);
        assert_eq!(resync.first(), Some(&Command::Hello));
        assert_eq!(resync.len(), HANDSHAKE_COMMANDS);
        assert!(wait_for(|| client.is_ready() && !client.is_degraded()));
    }

    #[test]
    fn test_request_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let (_first, _, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        client.request_reconnect();
        let (_second, _, commands) = accept_session(&listener);
        assert_eq!(commands.len(), HANDSHAKE_COMMANDS);
        assert!(wait_for(|| client.stats().sessions == 2));
    }

    #[test]
    fn test_shutdown_sends_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let (mut stream, mut decoder, _) = accept_session(&listener);
        assert!(wait_for(|| client.is_ready()));

        client.set_port(2);
        client.shutdown();
        assert_eq!(client.link_state(), LinkState::Disconnected);

        let commands = read_commands(&mut stream, &mut decoder, 2, Duration::from_secs(5));
        assert_eq!(commands, vec![Command::PortSet(2), Command::Quit]);

        // second shutdown is a no-op
        client.shutdown();
    }

    #[test]
    fn test_drop_joins_io_thread() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = BridgeClient::new(test_config(&listener)).unwrap();
        let started = Instant::now();
        drop(client);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
