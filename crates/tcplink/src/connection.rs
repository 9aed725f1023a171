//! Connection handle shared by clients and servers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tcplink_traits::{LinkError, LinkResult, Remote};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// One live TCP socket plus its liveness flag.
///
/// The read half is handed to the connection's read loop when the handle is created;
/// the handle keeps the write half. `disconnect` cancels the handle's token, which
/// stops the read loop, and closes the write half. The socket is released once both
/// halves are gone.
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    token: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Wraps a freshly dialed or accepted socket.
    ///
    /// `token` should be a child of whatever token stops the owner, so that shutting
    /// the owner down reaches this connection's read loop too.
    pub(crate) fn new(
        stream: TcpStream,
        token: CancellationToken,
    ) -> LinkResult<(Arc<Self>, OwnedReadHalf)> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            writer: Mutex::new(Some(writer)),
            connected: AtomicBool::new(true),
            token,
        });
        Ok((connection, reader))
    }

    /// Process-unique id, useful for correlating log lines.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The remote peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// The remote peer's address in `IP:port` form.
    pub fn address(&self) -> String {
        self.peer.to_string()
    }

    /// `false` once the connection failed or was disconnected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Writes all of `data`.
    ///
    /// A write error is returned as [`LinkError::SendFailed`] and nothing else
    /// happens; deciding whether to disconnect is up to the caller. A disconnect
    /// issued while a write is blocked aborts that write.
    pub async fn send(&self, data: &[u8]) -> LinkResult<()> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(LinkError::NotConnected),
            result = writer.write_all(data) => {
                result.map_err(|e| LinkError::SendFailed(e.to_string()))
            }
        }
    }

    /// Marks the connection dead, stops its read loop and closes the socket.
    ///
    /// Only the first call closes anything; later calls return `Ok(())`.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.connected.store(false, Ordering::Release);
        self.token.cancel();

        let writer = self.writer.lock().await.take();
        let Some(mut writer) = writer else {
            return Ok(());
        };

        debug!(conn_id = self.id, peer = %self.peer, "closing connection");
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            // The peer may already have reset the socket.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Remote for Connection {
    fn address(&self) -> String {
        Connection::address(self)
    }
}
