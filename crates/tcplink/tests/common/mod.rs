//! Shared helpers for the loopback integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tcplink::{
    Client, ClientHandler, ConnectionMode, Remote, Server, ServerHandler, TcpClient, TcpConfig,
    TcpServer,
};

pub const DEADLINE: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_config() -> TcpConfig {
    TcpConfig::builder()
        .deadlines(DEADLINE)
        .connect_timeout(Duration::from_secs(2))
        .build()
}

/// Polls `condition` every 10ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Records everything a client handler receives.
#[derive(Clone, Default)]
pub struct Inbox {
    units: Arc<Mutex<Vec<Bytes>>>,
}

impl Inbox {
    pub fn handler(&self) -> Arc<dyn ClientHandler> {
        let units = Arc::clone(&self.units);
        Arc::new(move |data: Bytes| units.lock().unwrap().push(data))
    }

    pub fn units(&self) -> Vec<Bytes> {
        self.units.lock().unwrap().clone()
    }

    pub fn concatenated(&self) -> Bytes {
        let mut all = BytesMut::new();
        for unit in self.units.lock().unwrap().iter() {
            all.extend_from_slice(unit);
        }
        all.freeze()
    }
}

/// Records everything a server handler receives, tagged with the sender's address.
#[derive(Clone, Default)]
pub struct ServerInbox {
    units: Arc<Mutex<Vec<(String, Bytes)>>>,
}

impl ServerInbox {
    pub fn handler(&self) -> Arc<dyn ServerHandler> {
        let units = Arc::clone(&self.units);
        Arc::new(move |remote: &dyn Remote, data: Bytes| {
            units.lock().unwrap().push((remote.address(), data));
        })
    }

    pub fn units(&self) -> Vec<(String, Bytes)> {
        self.units.lock().unwrap().clone()
    }
}

pub async fn start_server(mode: ConnectionMode) -> TcpServer {
    init_tracing();
    let server = TcpServer::with_config(0, mode, fast_config());
    server.start().await.expect("server should start");
    server
}

pub async fn connect_client(server: &TcpServer, inbox: &Inbox) -> TcpClient {
    let port = server.local_addr().expect("server is running").port();
    let client = TcpClient::with_config("127.0.0.1", port, server.mode(), fast_config());
    client.on_receive(inbox.handler());
    client.connect().await.expect("client should connect");
    client
}

/// Connects `count` clients and waits until the server tracks all of them.
pub async fn connect_clients(server: &TcpServer, count: usize) -> Vec<(TcpClient, Inbox)> {
    let mut clients = Vec::with_capacity(count);
    for _ in 0..count {
        let inbox = Inbox::default();
        let client = connect_client(server, &inbox).await;
        clients.push((client, inbox));
    }
    assert!(
        wait_until(Duration::from_secs(2), || server.connection_count() == count).await,
        "server should track {count} connections"
    );
    clients
}
