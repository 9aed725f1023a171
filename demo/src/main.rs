//! tcplink demo - line-based chat over TCP
//!
//! ```text
//! tcplink-demo server --port 7400 --mode message
//! tcplink-demo client --host 127.0.0.1 --port 7400 --mode message
//! ```
//!
//! The server broadcasts every stdin line to all connected clients; a client sends
//! every stdin line to the server. Received payloads go to stdout, logs to stderr
//! (`RUST_LOG` controls the level).

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde_json::json;
use tcplink::{Client, ConnectionMode, LinkMetrics, Remote, Server};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tcplink-demo", version, about = "Line-based chat over tcplink")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print a metrics snapshot as JSON on exit
    #[arg(long, global = true)]
    stats: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients and broadcast stdin lines to all of them
    Server {
        #[arg(long, short = 'p', default_value_t = 7400)]
        port: u16,

        /// `stream` or `message`
        #[arg(long, short = 'm', default_value = "stream")]
        mode: ConnectionMode,
    },
    /// Connect to a server and send stdin lines to it
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, short = 'p', default_value_t = 7400)]
        port: u16,

        /// `stream` or `message`
        #[arg(long, short = 'm', default_value = "stream")]
        mode: ConnectionMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let metrics = match cli.command {
        Command::Server { port, mode } => run_server(port, mode).await?,
        Command::Client { host, port, mode } => run_client(host, port, mode).await?,
    };

    if cli.stats {
        println!("{}", serde_json::to_string_pretty(&json!({ "metrics": metrics }))?);
    }
    Ok(())
}

async fn run_server(port: u16, mode: ConnectionMode) -> Result<LinkMetrics> {
    let server = tcplink::new_server(port, mode);
    server.on_receive(Arc::new(|remote: &dyn Remote, data: Bytes| {
        println!("[{}] {}", remote.address(), String::from_utf8_lossy(&data));
    }));
    server
        .start()
        .await
        .with_context(|| format!("starting server on port {port}"))?;
    info!(port, %mode, "tcplink-demo server running, type lines to broadcast");

    for_each_line(|line| {
        let server = &server;
        async move {
            if let Err(e) = server.broadcast(line.as_bytes()).await {
                warn!(error = %e, "broadcast incomplete");
            }
        }
    })
    .await?;

    if let Err(e) = server.stop().await {
        warn!(error = %e, "server stopped with errors");
    }
    Ok(server.metrics())
}

async fn run_client(host: String, port: u16, mode: ConnectionMode) -> Result<LinkMetrics> {
    let client = tcplink::new_client(host, port, mode);
    client.on_receive(Arc::new(|data: Bytes| {
        println!("{}", String::from_utf8_lossy(&data));
    }));
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", client.endpoint()))?;
    info!(endpoint = %client.endpoint(), %mode, "tcplink-demo client connected, type lines to send");

    for_each_line(|line| {
        let client = &client;
        async move {
            if let Err(e) = client.send(line.as_bytes()).await {
                warn!(error = %e, "send failed");
            }
        }
    })
    .await?;

    client.disconnect().await?;
    Ok(client.metrics())
}

/// Feeds stdin lines to `handle` until EOF or Ctrl-C.
async fn for_each_line<F, Fut>(mut handle: F) -> Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return Ok(());
            }
            line = lines.next_line() => {
                match line.context("reading stdin")? {
                    Some(line) => handle(line).await,
                    None => return Ok(()),
                }
            }
        }
    }
}
