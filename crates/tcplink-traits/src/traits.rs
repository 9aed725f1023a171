//! Client, server and handler traits.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LinkResult;
use crate::types::ConnectionMode;

/// Server-side identity of one connected peer.
pub trait Remote: Send + Sync {
    /// The peer's address in `IP:port` form.
    fn address(&self) -> String;
}

/// Receives every unit delivered to a client: a raw chunk in stream mode,
/// a complete payload in message mode.
///
/// Invoked from the client's read loop, one call at a time.
pub trait ClientHandler: Send + Sync {
    /// Handle one delivered unit.
    fn on_receive(&self, data: Bytes);
}

impl<F> ClientHandler for F
where
    F: Fn(Bytes) + Send + Sync,
{
    fn on_receive(&self, data: Bytes) {
        self(data);
    }
}

/// Receives every unit delivered to a server together with its originating peer.
///
/// Every accepted connection has its own read loop, so implementations are called
/// concurrently and must be reentrant.
pub trait ServerHandler: Send + Sync {
    /// Handle one delivered unit from `remote`.
    fn on_receive(&self, remote: &dyn Remote, data: Bytes);
}

impl<F> ServerHandler for F
where
    F: Fn(&dyn Remote, Bytes) + Send + Sync,
{
    fn on_receive(&self, remote: &dyn Remote, data: Bytes) {
        self(remote, data);
    }
}

/// A TCP client holding at most one live connection.
#[async_trait]
pub trait Client: Send + Sync + std::fmt::Debug {
    /// The framing mode chosen at construction.
    fn mode(&self) -> ConnectionMode;

    /// Dials the configured endpoint and starts the background read loop.
    async fn connect(&self) -> LinkResult<()>;

    /// Closes the connection and waits for the read loop to finish.
    async fn disconnect(&self) -> LinkResult<()>;

    /// Sends one payload (raw bytes or one frame, depending on the mode).
    async fn send(&self, data: &[u8]) -> LinkResult<()>;

    /// Replaces the receive handler.
    fn on_receive(&self, handler: Arc<dyn ClientHandler>);

    /// Returns `true` while the connection is live.
    fn is_connected(&self) -> bool;
}

/// A TCP server accepting any number of connections.
#[async_trait]
pub trait Server: Send + Sync + std::fmt::Debug {
    /// The framing mode chosen at construction.
    fn mode(&self) -> ConnectionMode;

    /// Binds the listener and starts the accept loop.
    async fn start(&self) -> LinkResult<()>;

    /// Stops accepting, disconnects every connection and waits for the accept loop.
    async fn stop(&self) -> LinkResult<()>;

    /// Best-effort delivery of one payload to every tracked connection.
    async fn broadcast(&self, data: &[u8]) -> LinkResult<()>;

    /// Replaces the receive handler.
    fn on_receive(&self, handler: Arc<dyn ServerHandler>);

    /// Returns `true` between a successful `start` and `stop`.
    fn is_running(&self) -> bool;
}
