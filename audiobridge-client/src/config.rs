//! Client configuration.

use audiobridge_protocol::DEFAULT_PORT;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default outbound queue capacity (32 KiB).
pub const DEFAULT_QUEUE_CAPACITY: usize = 32 * 1024;

/// Minimum outbound queue capacity (1 KiB).
pub const MIN_QUEUE_CAPACITY: usize = 1024;

/// Maximum outbound queue capacity (16 MiB).
pub const MAX_QUEUE_CAPACITY: usize = 16 * 1024 * 1024;

/// Default number of interleaved audio channels.
pub const DEFAULT_CHANNELS: usize = 2;

/// Bridge client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Engine address.
    pub addr: SocketAddr,
    /// Delay between failed connection attempts.
    pub retry_delay: Duration,
    /// Upper bound on how long queued bytes wait before the IO thread wakes.
    pub flush_interval: Duration,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Outbound ring buffer capacity in bytes.
    pub queue_capacity: usize,
    /// Interleaved channels per audio frame.
    pub channels: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            retry_delay: Duration::from_millis(100),
            flush_interval: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(500),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Self::default()
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.clamp(MIN_QUEUE_CAPACITY, MAX_QUEUE_CAPACITY);
        self
    }

    /// Sets the channel count; zero is treated as mono.
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Reapplies the builder bounds to a config that may have been built
    /// from a struct literal.
    pub fn normalized(self) -> Self {
        let queue_capacity = self.queue_capacity;
        let channels = self.channels;
        self.with_queue_capacity(queue_capacity).with_channels(channels)
    }
}
