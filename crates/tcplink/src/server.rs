//! TCP server for both connection modes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tcplink_traits::{
    AggregateError, AtomicMetrics, ConnectionMode, LinkError, LinkMetrics, LinkResult, Server,
    ServerHandler, TcpConfig,
};

use crate::codec;
use crate::connection::Connection;
use crate::handler::HandlerSlot;
use crate::session;

const PROBLEMS_CLOSING: &str = "there were problems closing tcp server";
const PROBLEMS_BROADCASTING: &str = "there were problems broadcasting message";

/// State shared between the server handle, its accept loop and every read loop.
struct Shared {
    mode: ConnectionMode,
    config: TcpConfig,
    /// Tracked connections in accept order (std mutex - never held across await)
    connections: StdMutex<Vec<Arc<Connection>>>,
    handler: HandlerSlot<dyn ServerHandler>,
    metrics: AtomicMetrics,
}

impl Shared {
    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .clone()
    }

    fn track(&self, connection: Arc<Connection>) {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .push(connection);
    }

    /// Drops every connection whose `connected` flag is false, in one pass.
    fn prune(&self) {
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        connections.retain(|connection| {
            if connection.is_connected() {
                true
            } else {
                info!("Client {} removed", connection.address());
                false
            }
        });
    }

    fn drain(&self) -> Vec<Arc<Connection>> {
        std::mem::take(&mut *self.connections.lock().expect("connections mutex poisoned"))
    }

    async fn read_connection(
        &self,
        connection: Arc<Connection>,
        reader: tokio::net::tcp::OwnedReadHalf,
    ) {
        let result = session::run_read_loop(
            self.mode,
            reader,
            connection.token(),
            &self.config,
            &self.metrics,
            |data| {
                if let Some(handler) = self.handler.get() {
                    handler.on_receive(connection.as_ref(), data);
                }
            },
        )
        .await;

        session::log_loop_exit(&connection, &result);
        if let Err(e) = connection.disconnect().await {
            debug!("Error closing connection to {}: {}", connection.address(), e);
        }
        self.metrics.connection_closed();
    }
}

/// TCP server tracking every accepted connection.
///
/// [`Server::start`] binds `0.0.0.0:<port>` and spawns the accept loop; each accepted
/// socket gets its own read loop. The registered [`ServerHandler`] is shared by all
/// read loops and is called concurrently from different connections.
pub struct TcpServer {
    port: u16,
    shared: Arc<Shared>,
    running: AtomicBool,
    local_addr: StdMutex<Option<SocketAddr>>,
    /// Root token of the current run; every connection token is a child of it
    shutdown: StdMutex<Option<CancellationToken>>,
    /// Accept loop of the current run; also serializes start/stop
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("port", &self.port)
            .field("mode", &self.shared.mode)
            .field("config", &self.shared.config)
            .field("running", &self.is_running())
            .field("connections", &self.connection_count())
            .field("has_handler", &self.shared.handler.is_set())
            .finish()
    }
}

impl TcpServer {
    /// Create a server for `port` with the default configuration
    #[must_use]
    pub fn new(port: u16, mode: ConnectionMode) -> Self {
        Self::with_config(port, mode, TcpConfig::default())
    }

    /// Create a server with an explicit configuration
    #[must_use]
    pub fn with_config(port: u16, mode: ConnectionMode, config: TcpConfig) -> Self {
        Self {
            port,
            shared: Arc::new(Shared {
                mode,
                config,
                connections: StdMutex::new(Vec::new()),
                handler: HandlerSlot::new(),
                metrics: AtomicMetrics::new(),
            }),
            running: AtomicBool::new(false),
            local_addr: StdMutex::new(None),
            shutdown: StdMutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// The address the listener is bound to while running. Resolves port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr mutex poisoned")
    }

    /// The active configuration
    pub fn config(&self) -> &TcpConfig {
        &self.shared.config
    }

    /// Number of tracked connections, including dead ones not yet pruned
    pub fn connection_count(&self) -> usize {
        self.shared
            .connections
            .lock()
            .expect("connections mutex poisoned")
            .len()
    }

    /// Snapshot of the tracked connections in accept order
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.snapshot()
    }

    /// Snapshot of this server's counters
    pub fn metrics(&self) -> LinkMetrics {
        self.shared.metrics.snapshot()
    }

    fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

async fn accept_loop(listener: TcpListener, shutdown: CancellationToken, shared: Arc<Shared>) {
    let listen_addr = listener
        .local_addr()
        .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
    let mut connection_tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                info!("TCP accept loop received shutdown signal");
                break;
            }
            result = tokio::time::timeout(shared.config.accept_deadline, listener.accept()) => {
                match result {
                    // Deadline expired with nothing to accept
                    Err(_) => {}
                    Ok(Ok((stream, peer))) => {
                        if let Some((connection, reader)) = register(&shared, stream, peer, &shutdown) {
                            let shared = Arc::clone(&shared);
                            connection_tasks.spawn(async move {
                                shared.read_connection(connection, reader).await;
                            });
                        }
                    }
                    Ok(Err(e)) => {
                        shared.metrics.record_failure();
                        error!("Failed to accept incoming connection on {}: {}", listen_addr, e);
                    }
                }
            }
        }

        // Reap read loops of connections that already went away
        while connection_tasks.try_join_next().is_some() {}
    }

    drop(listener);
    debug!("Listener on {} closed", listen_addr);

    // Every read loop holds a child of the shutdown token, so they are already stopping
    if !connection_tasks.is_empty() {
        info!("Waiting for {} TCP read loops to finish", connection_tasks.len());
        let grace = shared.config.read_deadline;
        let drained = tokio::time::timeout(grace, async {
            while connection_tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Aborting {} TCP read loops due to timeout", connection_tasks.len());
            connection_tasks.shutdown().await;
        }
    }
    info!("TCP accept loop shutdown complete");
}

fn register(
    shared: &Shared,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: &CancellationToken,
) -> Option<(Arc<Connection>, tokio::net::tcp::OwnedReadHalf)> {
    if let Err(e) = stream.set_nodelay(shared.config.nodelay) {
        debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
    }

    match Connection::new(stream, shutdown.child_token()) {
        Ok((connection, reader)) => {
            info!("Accepted TCP connection from {}", peer);
            shared.track(Arc::clone(&connection));
            shared.metrics.connection_opened();
            Some((connection, reader))
        }
        Err(e) => {
            shared.metrics.record_failure();
            warn!("Dropping accepted connection from {}: {}", peer, e);
            None
        }
    }
}

#[async_trait]
impl Server for TcpServer {
    fn mode(&self) -> ConnectionMode {
        self.shared.mode
    }

    async fn start(&self) -> LinkResult<()> {
        self.shared.config.validate()?;
        let mut accept_task = self.accept_task.lock().await;

        if self.is_running() {
            let addr = self
                .local_addr()
                .map_or_else(|| self.listen_addr(), |addr| addr.to_string());
            return Err(LinkError::AlreadyRunning(addr));
        }

        self.shared.drain();

        let listen_addr = self.listen_addr();
        let listener = TcpListener::bind(&listen_addr).await.map_err(|e| {
            self.shared.metrics.record_failure();
            LinkError::Listen {
                addr: listen_addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let local_addr = listener.local_addr().map_err(|e| LinkError::Listen {
            addr: listen_addr.clone(),
            reason: e.to_string(),
        })?;

        info!("Accepting connections on {} ({} mode)", local_addr, self.shared.mode);

        let shutdown = CancellationToken::new();
        *self.shutdown.lock().expect("shutdown mutex poisoned") = Some(shutdown.clone());
        *self.local_addr.lock().expect("local_addr mutex poisoned") = Some(local_addr);
        self.running.store(true, Ordering::Release);

        *accept_task = Some(tokio::spawn(accept_loop(
            listener,
            shutdown,
            Arc::clone(&self.shared),
        )));

        Ok(())
    }

    async fn stop(&self) -> LinkResult<()> {
        let mut accept_task = self.accept_task.lock().await;
        let was_running = self.running.swap(false, Ordering::AcqRel);

        let shutdown = self.shutdown.lock().expect("shutdown mutex poisoned").take();
        if let Some(shutdown) = shutdown {
            shutdown.cancel();
        }

        // Joining first guarantees nothing is appended after the drain below
        if let Some(handle) = accept_task.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!("TCP accept loop panicked: {:?}", e);
        }

        let mut errors = AggregateError::new(PROBLEMS_CLOSING);
        for connection in self.shared.drain() {
            if let Err(e) = connection.disconnect().await {
                errors.push(connection.address(), e);
            }
        }

        *self.local_addr.lock().expect("local_addr mutex poisoned") = None;
        if was_running {
            info!("TCP server on port {} stopped", self.port);
        }
        errors.into_result()
    }

    async fn broadcast(&self, data: &[u8]) -> LinkResult<()> {
        let frame = match self.shared.mode {
            ConnectionMode::Stream => None,
            ConnectionMode::Message => {
                self.shared.config.check_frame_size(data.len())?;
                Some(codec::encode_frame(data)?)
            }
        };
        let wire = frame.as_deref().unwrap_or(data);

        let mut errors = AggregateError::new(PROBLEMS_BROADCASTING);
        for connection in self.shared.snapshot() {
            match connection.send(wire).await {
                Ok(()) => self.shared.metrics.record_sent(wire.len()),
                Err(e) => {
                    warn!("Disconnecting {} due to a write error: {}", connection.address(), e);
                    self.shared.metrics.record_failure();
                    if let Err(close_err) = connection.disconnect().await {
                        debug!("Error closing connection to {}: {}", connection.address(), close_err);
                    }
                    errors.push(connection.address(), e);
                }
            }
        }

        self.shared.prune();
        errors.into_result()
    }

    fn on_receive(&self, handler: Arc<dyn ServerHandler>) {
        self.shared.handler.set(handler);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
