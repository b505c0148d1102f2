//! Connection management on the IO thread.
//!
//! The thread cycles through `Disconnected -> Connecting -> Handshaking ->
//! Ready` until the client stops. Every socket call happens here, outside the
//! client lock.

use crate::client::{Inner, LinkState, Shared};
use crate::config::ClientConfig;
use crate::error::ClientError;
use audiobridge_protocol::{Command, Encoder};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Entry point of the IO thread.
pub(crate) fn run(shared: Arc<Shared>) {
    let mut scratch = Vec::with_capacity(shared.config.queue_capacity);
    tracing::debug!(addr = %shared.config.addr, "IO thread started");

    while let Some(mut stream) = connect(&shared) {
        let result = handshake(&shared).and_then(|()| pump(&shared, &mut stream, &mut scratch));
        teardown(&shared, &stream);

        match result {
            Ok(()) => break,
            Err(e) => {
                tracing::info!(error = %e, "connection lost, reconnecting");
                sleep_unless_stopped(&shared);
            }
        }
    }

    teardown_state(&mut shared.inner.lock());
    tracing::debug!("IO thread exiting");
}

/// Opens a socket, retrying every `retry_delay` until it succeeds or the
/// client stops. Returns `None` on stop.
fn connect(shared: &Shared) -> Option<TcpStream> {
    loop {
        {
            let mut inner = shared.inner.lock();
            if inner.stop {
                return None;
            }
            inner.link = LinkState::Connecting;
        }

        shared.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);
        match open(&shared.config) {
            Ok(stream) => {
                tracing::debug!(addr = %shared.config.addr, "connected");
                // observable until `handshake` takes the lock
                shared.inner.lock().link = LinkState::Handshaking;
                return Some(stream);
            }
            Err(e) => {
                tracing::debug!(addr = %shared.config.addr, error = %e, "connect failed");
                shared.inner.lock().link = LinkState::Disconnected;
                sleep_unless_stopped(shared);
            }
        }
    }
}

fn open(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let stream = TcpStream::connect_timeout(&config.addr, config.connect_timeout).map_err(|e| {
        if e.kind() == ErrorKind::TimedOut {
            ClientError::ConnectTimeout(config.connect_timeout)
        } else {
            ClientError::Io(e)
        }
    })?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Replaces whatever is queued with HELLO and a full session snapshot.
///
/// Runs under the same lock as the setters, so an update either lands in the
/// snapshot or is queued after it.
fn handshake(shared: &Shared) -> Result<(), ClientError> {
    let mut inner = shared.inner.lock();
    inner.queue.clear();
    inner.degraded = false;

    let Inner { session, queue, .. } = &mut *inner;
    if !session.encode_handshake(queue) {
        return Err(ClientError::Degraded);
    }

    inner.link = LinkState::Ready;
    shared.counters.sessions.fetch_add(1, Ordering::Relaxed);
    tracing::info!(
        addr = %shared.config.addr,
        port = inner.session.port,
        sample_rate = inner.session.sample_rate,
        "session established"
    );
    Ok(())
}

/// Drains the outbound queue until the connection fails or the client stops.
///
/// Returns `Ok(())` only on stop, after flushing the queue and sending QUIT.
fn pump(shared: &Shared, stream: &mut TcpStream, scratch: &mut Vec<u8>) -> Result<(), ClientError> {
    loop {
        let stopping = {
            let mut inner = shared.inner.lock();
            if inner.queue.is_empty() && !inner.degraded && !inner.stop {
                shared.wake.wait_for(&mut inner, shared.config.flush_interval);
            }
            if inner.degraded && !inner.stop {
                return Err(ClientError::Degraded);
            }
            scratch.clear();
            inner.queue.copy_to(scratch);
            inner.queue.clear();
            inner.stop
        };

        if !scratch.is_empty() {
            stream.write_all(scratch)?;
            shared
                .counters
                .bytes_sent
                .fetch_add(scratch.len() as u64, Ordering::Relaxed);
        }

        if stopping {
            send_quit(stream);
            return Ok(());
        }

        check_peer(stream)?;
    }
}

fn send_quit(stream: &mut TcpStream) {
    let quit = Encoder::encode(&Command::Quit);
    if let Err(e) = stream.write_all(&quit).and_then(|()| stream.flush()) {
        tracing::debug!(error = %e, "failed to send QUIT");
    }
}

/// Detects a peer that closed its end. The engine never sends data, so
/// anything readable is discarded.
fn check_peer(stream: &mut TcpStream) -> Result<(), ClientError> {
    let mut probe = [0u8; 256];
    stream.set_nonblocking(true)?;
    let result = stream.read(&mut probe);
    stream.set_nonblocking(false)?;

    match result {
        Ok(0) => Err(ClientError::ConnectionClosed),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(ClientError::Io(e)),
    }
}

fn teardown(shared: &Shared, stream: &TcpStream) {
    let _ = stream.shutdown(Shutdown::Both);
    teardown_state(&mut shared.inner.lock());
}

fn teardown_state(inner: &mut Inner) {
    inner.link = LinkState::Disconnected;
    inner.queue.clear();
}

/// Waits one `retry_delay`, returning early if the client stops.
fn sleep_unless_stopped(shared: &Shared) {
    let deadline = Instant::now() + shared.config.retry_delay;
    let mut inner = shared.inner.lock();
    while !inner.stop {
        if shared.wake.wait_until(&mut inner, deadline).timed_out() {
            break;
        }
    }
}
