//! # tcplink traits
//!
//! Core traits and types shared by the tcplink transports.
//! This crate carries no I/O of its own; the TCP implementation lives in `tcplink`.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`Client`], [`Server`], [`Remote`], [`ClientHandler`], [`ServerHandler`]
//! - **Types**: [`ConnectionMode`]
//! - **Errors**: [`LinkError`], [`AggregateError`], [`LinkResult`]
//! - **Config**: [`TcpConfig`], [`TcpConfigBuilder`]
//! - **Metrics**: [`LinkMetrics`], [`AtomicMetrics`]
//!
//! ## Usage
//!
//! Handlers are plain closures:
//!
//! ```rust,ignore
//! use tcplink_traits::{Client, Remote};
//!
//! client.on_receive(Arc::new(|data: Bytes| println!("{} bytes", data.len())));
//! server.on_receive(Arc::new(|remote: &dyn Remote, data: Bytes| {
//!     println!("{} sent {} bytes", remote.address(), data.len());
//! }));
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

mod config;
mod error;
mod metrics;
mod traits;
mod types;

pub use config::{TcpConfig, TcpConfigBuilder};
pub use error::{AggregateError, LinkError, LinkResult};
pub use metrics::{AtomicMetrics, LinkMetrics};
pub use traits::{Client, ClientHandler, Remote, Server, ServerHandler};
pub use types::{ConnectionMode, MESSAGE_HEADER_SIZE};
