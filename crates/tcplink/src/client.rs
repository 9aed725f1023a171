//! TCP client for both connection modes.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tcplink_traits::{
    AtomicMetrics, Client, ClientHandler, ConnectionMode, LinkError, LinkMetrics, LinkResult,
    TcpConfig,
};

use crate::codec;
use crate::connection::Connection;
use crate::handler::HandlerSlot;
use crate::session;

/// TCP client holding at most one live connection.
///
/// Construction performs no I/O. [`Client::connect`] dials and spawns the read loop;
/// the registered [`ClientHandler`] then sees raw chunks (stream mode) or complete
/// payloads (message mode), one call at a time, in wire order.
pub struct TcpClient {
    host: String,
    port: u16,
    mode: ConnectionMode,
    config: TcpConfig,
    /// Current connection (std mutex - short-lived)
    connection: StdMutex<Option<Arc<Connection>>>,
    /// Read loop of the current connection; also serializes connect/disconnect
    reader_task: Mutex<Option<JoinHandle<()>>>,
    handler: HandlerSlot<dyn ClientHandler>,
    metrics: Arc<AtomicMetrics>,
}

impl std::fmt::Debug for TcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClient")
            .field("endpoint", &self.endpoint())
            .field("mode", &self.mode)
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("has_handler", &self.handler.is_set())
            .finish()
    }
}

impl TcpClient {
    /// Create a client for `host:port` with the default configuration
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, mode: ConnectionMode) -> Self {
        Self::with_config(host, port, mode, TcpConfig::default())
    }

    /// Create a client with an explicit configuration
    #[must_use]
    pub fn with_config(
        host: impl Into<String>,
        port: u16,
        mode: ConnectionMode,
        config: TcpConfig,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            mode,
            config,
            connection: StdMutex::new(None),
            reader_task: Mutex::new(None),
            handler: HandlerSlot::new(),
            metrics: Arc::new(AtomicMetrics::new()),
        }
    }

    /// The dial target, `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The active configuration
    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Snapshot of this client's counters
    pub fn metrics(&self) -> LinkMetrics {
        self.metrics.snapshot()
    }

    fn current_connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .lock()
            .expect("connection mutex poisoned")
            .clone()
    }

    async fn dial(&self) -> LinkResult<TcpStream> {
        let addr = self.endpoint();
        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(LinkError::Dial {
                addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(LinkError::Dial {
                addr,
                reason: format!("timed out after {timeout:?}"),
            }),
        }
    }
}

#[async_trait]
impl Client for TcpClient {
    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    async fn connect(&self) -> LinkResult<()> {
        self.config.validate()?;
        let mut reader_task = self.reader_task.lock().await;

        // A read loop that panicked leaves its connection flagged as live
        let loop_running = reader_task.as_ref().is_some_and(|task| !task.is_finished());
        if let Some(existing) = self.current_connection()
            && existing.is_connected()
            && loop_running
        {
            return Err(LinkError::AlreadyConnected(existing.address()));
        }

        info!("Connecting to TCP server at {}", self.endpoint());
        let stream = self.dial().await.inspect_err(|_| self.metrics.record_failure())?;
        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            debug!("Could not set TCP_NODELAY on {}: {}", self.endpoint(), e);
        }

        let (connection, reader) = Connection::new(stream, CancellationToken::new())?;
        info!("Connected to {} ({} mode)", connection.address(), self.mode);

        // A previous connection that died on its own still has a finished loop to reap
        if let Some(previous) = reader_task.take()
            && let Err(e) = previous.await
            && e.is_panic()
        {
            warn!("Previous TCP client read loop panicked: {:?}", e);
            if let Some(stale) = self.current_connection()
                && let Err(close_err) = stale.disconnect().await
            {
                debug!("Error closing connection to {}: {}", stale.address(), close_err);
            }
            self.metrics.connection_closed();
        }

        *self.connection.lock().expect("connection mutex poisoned") = Some(connection.clone());
        self.metrics.connection_opened();

        let mode = self.mode;
        let config = self.config.clone();
        let handler = self.handler.clone();
        let metrics = Arc::clone(&self.metrics);
        *reader_task = Some(tokio::spawn(async move {
            let result = session::run_read_loop(
                mode,
                reader,
                connection.token(),
                &config,
                &metrics,
                |data| {
                    if let Some(handler) = handler.get() {
                        handler.on_receive(data);
                    }
                },
            )
            .await;

            session::log_loop_exit(&connection, &result);
            if let Err(e) = connection.disconnect().await {
                debug!("Error closing connection to {}: {}", connection.address(), e);
            }
            metrics.connection_closed();
        }));

        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        let mut reader_task = self.reader_task.lock().await;
        let taken = self
            .connection
            .lock()
            .expect("connection mutex poisoned")
            .take();
        let Some(connection) = taken else {
            return Ok(());
        };

        info!("Disconnecting from {}", connection.address());
        let result = connection.disconnect().await;

        if let Some(handle) = reader_task.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!("TCP client read loop panicked: {:?}", e);
        }

        result
    }

    async fn send(&self, data: &[u8]) -> LinkResult<()> {
        let connection = self.current_connection().ok_or(LinkError::NotConnected)?;

        let frame = match self.mode {
            ConnectionMode::Stream => None,
            ConnectionMode::Message => {
                self.config.check_frame_size(data.len())?;
                Some(codec::encode_frame(data)?)
            }
        };
        let wire = frame.as_deref().unwrap_or(data);

        match connection.send(wire).await {
            Ok(()) => {
                self.metrics.record_sent(wire.len());
                Ok(())
            }
            Err(e) => {
                // The peer may have seen part of the write; the stream cannot be trusted
                warn!("Disconnecting from {} due to a write error: {}", connection.address(), e);
                self.metrics.record_failure();
                if let Err(close_err) = connection.disconnect().await {
                    debug!("Error closing connection to {}: {}", connection.address(), close_err);
                }
                Err(e)
            }
        }
    }

    fn on_receive(&self, handler: Arc<dyn ClientHandler>) {
        self.handler.set(handler);
    }

    fn is_connected(&self) -> bool {
        self.current_connection()
            .is_some_and(|connection| connection.is_connected())
    }
}
