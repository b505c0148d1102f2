//! TCP server implementation.

use crate::config::{Config, MIN_RECV_QUEUE};
use crate::connection::BridgeServerConnection;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, HandlerFactory};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Bytes requested from the socket per read.
    pub recv_buffer_size: usize,
    /// Capacity of each connection's receive queue.
    pub recv_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            max_connections: config.network.max_connections,
            recv_buffer_size: config.protocol.recv_buffer_size,
            recv_queue_capacity: config.protocol.recv_queue_capacity,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(1);
        self
    }

    /// Sets the receive queue capacity, floored at [`MIN_RECV_QUEUE`].
    pub fn with_recv_queue_capacity(mut self, capacity: usize) -> Self {
        self.recv_queue_capacity = capacity.max(MIN_RECV_QUEUE);
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub bytes_received: AtomicU64,
    pub commands_total: AtomicU64,
}

/// Accepts bridge clients and runs one parser task per connection.
pub struct Server {
    config: ServerConfig,
    factory: HandlerFactory,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    stopping: AtomicBool,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a new server. `factory` builds the handler for each peer.
    pub fn new(config: ServerConfig, factory: HandlerFactory) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            factory,
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Binds the listener without accepting yet.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        Ok(listener)
    }

    /// Binds and serves until [`Server::shutdown`] is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.stopping.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => self.spawn_connection(tcp_stream, addr),
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn spawn_connection(&self, tcp_stream: TcpStream, addr: SocketAddr) {
        if self.stats.connections_active.load(Ordering::Relaxed)
            >= self.config.max_connections as u64
        {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            self.stats
                .connections_rejected
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        let handler = (self.factory)(addr);
        let stats = self.stats.clone();
        let config = self.config.clone();
        let mut conn_shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            tracing::info!("Client connected: {}", addr);
            let result = Self::handle_connection(
                tcp_stream,
                addr,
                handler,
                &config,
                &stats,
                &mut conn_shutdown,
            )
            .await;

            match result {
                Ok(()) => {}
                Err(e) if e.is_protocol_violation() => {
                    tracing::warn!("[{}] Protocol violation: {}", addr, e);
                    stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::debug!("[{}] Connection error: {}", addr, e);
                }
            }

            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
            tracing::info!("Client disconnected: {}", addr);
        });
    }

    /// Reads from one socket and drives its parser until EOF, QUIT, an
    /// error or shutdown.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Box<dyn ConnectionHandler>,
        config: &ServerConfig,
        stats: &ServerStats,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true)?;

        // the fields are public, so the builder floors may have been bypassed
        let queue_capacity = config.recv_queue_capacity.max(MIN_RECV_QUEUE);
        let recv_buffer_size = config.recv_buffer_size.max(1);

        let mut conn = BridgeServerConnection::with_peer(handler, queue_capacity, Some(addr));
        let mut buf = vec![0u8; recv_buffer_size];

        let result = loop {
            // never read more than the queue can take
            let want = recv_buffer_size.min(conn.free());
            if want == 0 {
                break Err(ServerError::QueueOverflow {
                    needed: 1,
                    free: 0,
                });
            }

            tokio::select! {
                result = stream.read(&mut buf[..want]) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            break Ok(());
                        }
                        Ok(n) => {
                            stats.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                            if let Err(e) = conn.feed(&buf[..n]).and_then(|()| conn.process()) {
                                break Err(e);
                            }
                            if conn.is_closed() {
                                tracing::debug!("[{}] Session closed by QUIT", addr);
                                break Ok(());
                            }
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            break Err(ServerError::Io(e));
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    break Err(ServerError::ShuttingDown);
                }
            }
        };

        conn.close();
        stats
            .commands_total
            .fetch_add(conn.session().commands_applied, Ordering::Relaxed);
        result
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to, once [`Server::bind`] has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}
