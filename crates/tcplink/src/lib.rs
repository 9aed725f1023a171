//! # tcplink
//!
//! A small TCP transport with two interchangeable client/server pairs:
//!
//! - **Stream mode**: bytes are handed to the receive handler as they arrive, with
//!   whatever chunk boundaries the network produced.
//! - **Message mode**: every payload travels as a frame,
//!   `[u32 big-endian length][payload]`, and the receiver gets exactly the payloads
//!   that were sent, however the transport fragmented them.
//!
//! ## Features
//!
//! - **One read loop per connection**: spawned on connect/accept, stopped by
//!   cancellation tokens, with a bounded read deadline as the polling interval
//! - **Broadcast with isolation**: a failing connection is disconnected and reported,
//!   the others still receive the payload
//! - **Aggregated errors**: `stop` and `broadcast` report every per-connection failure
//!   in one [`AggregateError`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tcplink::{Client, ConnectionMode, Remote, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = tcplink::new_server(7400, ConnectionMode::Message);
//!     server.on_receive(Arc::new(|remote: &dyn Remote, data: Bytes| {
//!         println!("{} sent {:?}", remote.address(), data);
//!     }));
//!     server.start().await?;
//!
//!     let client = tcplink::new_client("127.0.0.1", 7400, ConnectionMode::Message);
//!     client.connect().await?;
//!     client.send(b"hello").await?;
//!
//!     client.disconnect().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod client;
pub mod codec;
mod connection;
mod handler;
mod server;
mod session;

pub use client::TcpClient;
pub use connection::Connection;
pub use server::TcpServer;

// Re-export the shared traits for convenience
pub use tcplink_traits::{
    AggregateError, AtomicMetrics, Client, ClientHandler, ConnectionMode, LinkError,
    LinkMetrics, LinkResult, MESSAGE_HEADER_SIZE, Remote, Server, ServerHandler, TcpConfig,
    TcpConfigBuilder,
};

/// Creates a client for `host:port` in the given mode. No I/O happens until `connect`.
#[must_use]
pub fn new_client(host: impl Into<String>, port: u16, mode: ConnectionMode) -> TcpClient {
    TcpClient::new(host, port, mode)
}

/// Creates a server for `0.0.0.0:<port>` in the given mode. No I/O happens until `start`.
#[must_use]
pub fn new_server(port: u16, mode: ConnectionMode) -> TcpServer {
    TcpServer::new(port, mode)
}
