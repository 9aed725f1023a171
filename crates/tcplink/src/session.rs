//! Per-connection read loops.
//!
//! Both clients and servers run one of these per live connection. The loop ends on
//! cancellation ([`LinkError::Interrupted`]), on EOF ([`LinkError::ConnectionClosed`])
//! or on any other fatal read error; it never returns `Ok`.

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tcplink_traits::{
    AtomicMetrics, ConnectionMode, LinkError, LinkResult, MESSAGE_HEADER_SIZE, TcpConfig,
};

use crate::codec::{self, FrameReader, ReadControl};
use crate::connection::Connection;

/// Reads from `reader` until the loop has to stop, handing every unit to `deliver`.
pub(crate) async fn run_read_loop<R, F>(
    mode: ConnectionMode,
    mut reader: R,
    token: &CancellationToken,
    config: &TcpConfig,
    metrics: &AtomicMetrics,
    mut deliver: F,
) -> LinkResult<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Bytes),
{
    let control = ReadControl::new(token, config);
    match mode {
        ConnectionMode::Stream => {
            stream_loop(&mut reader, &control, config.read_buffer_size, metrics, &mut deliver).await
        }
        ConnectionMode::Message => {
            let frames = FrameReader::new(reader, config);
            message_loop(frames, &control, metrics, &mut deliver).await
        }
    }
}

async fn stream_loop<R, F>(
    reader: &mut R,
    control: &ReadControl<'_>,
    buffer_size: usize,
    metrics: &AtomicMetrics,
    deliver: &mut F,
) -> LinkResult<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Bytes),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let Some(n) = codec::read_some(reader, &mut buf, control).await? else {
            continue;
        };
        metrics.record_received(n);
        deliver(Bytes::copy_from_slice(&buf[..n]));
    }
}

async fn message_loop<R, F>(
    mut frames: FrameReader<R>,
    control: &ReadControl<'_>,
    metrics: &AtomicMetrics,
    deliver: &mut F,
) -> LinkResult<()>
where
    R: AsyncRead + Unpin,
    F: FnMut(Bytes),
{
    loop {
        let payload = frames.next_frame(control).await?;
        metrics.record_received(MESSAGE_HEADER_SIZE + payload.len());
        deliver(payload);
    }
}

/// Logs why a read loop ended. Interruption is the normal shutdown path.
pub(crate) fn log_loop_exit(connection: &Connection, result: &LinkResult<()>) {
    let conn_id = connection.id();
    let peer = connection.peer_addr();
    match result {
        Ok(()) | Err(LinkError::Interrupted) => {
            debug!(conn_id, peer = %peer, "read loop stopped");
        }
        Err(LinkError::ConnectionClosed) => {
            info!(conn_id, peer = %peer, "connection closed by peer");
        }
        Err(e) => {
            warn!(conn_id, peer = %peer, error = %e, "disconnecting due to a read error");
        }
    }
}
