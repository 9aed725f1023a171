//! Length-prefixed framing and deadline-bounded reads.
//!
//! A message-mode frame is a 4-byte big-endian payload length followed by exactly
//! that many payload bytes. Framing goes through [`FrameCodec`], a
//! `tokio_util::codec` wrapper around [`LengthDelimitedCodec`] that enforces the
//! configured frame limit. Every read here is bounded by the configured read
//! deadline; an expired deadline is not an error, it only gives the caller a chance
//! to observe cancellation before reading again.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder, FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use tcplink_traits::{LinkError, LinkResult, MESSAGE_HEADER_SIZE, TcpConfig};

/// Cancellation and deadline policy for one read loop.
#[derive(Debug, Clone, Copy)]
pub struct ReadControl<'a> {
    token: &'a CancellationToken,
    config: &'a TcpConfig,
}

impl<'a> ReadControl<'a> {
    /// Reads stop with [`LinkError::Interrupted`] once `token` is cancelled.
    pub fn new(token: &'a CancellationToken, config: &'a TcpConfig) -> Self {
        Self { token, config }
    }
}

/// Encodes a payload length as the 4-byte big-endian header.
pub fn encode_header(len: usize) -> LinkResult<[u8; MESSAGE_HEADER_SIZE]> {
    let len = u32::try_from(len).map_err(|_| LinkError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })?;
    Ok(len.to_be_bytes())
}

/// Decodes the payload length carried by a header.
pub fn decode_header(header: [u8; MESSAGE_HEADER_SIZE]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// `[u32 big-endian length][payload]` codec with a payload limit.
///
/// A payload is only handed to the inner codec once it is completely buffered, so
/// the read buffer grows with the bytes that actually arrived rather than with the
/// length a header announces.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    limit: usize,
}

impl FrameCodec {
    /// Codec rejecting payloads longer than `limit` bytes.
    pub fn new(limit: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .length_field_length(MESSAGE_HEADER_SIZE)
            .big_endian()
            .max_frame_length(limit)
            .new_codec();
        Self { inner, limit }
    }

    /// Codec using the frame limit of `config`.
    pub fn from_config(config: &TcpConfig) -> Self {
        Self::new(config.frame_limit())
    }

    fn check(&self, size: usize) -> LinkResult<()> {
        if size > self.limit {
            return Err(LinkError::FrameTooLarge {
                size,
                max: self.limit,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> LinkResult<Option<BytesMut>> {
        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }
        let mut header = [0u8; MESSAGE_HEADER_SIZE];
        header.copy_from_slice(&src[..MESSAGE_HEADER_SIZE]);
        let len = decode_header(header);
        self.check(len)?;

        if src.len() - MESSAGE_HEADER_SIZE < len {
            return Ok(None);
        }
        Ok(self.inner.decode(src)?)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> LinkResult<Option<BytesMut>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // EOF in the middle of a frame
            None => Err(LinkError::ConnectionClosed),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = LinkError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> LinkResult<()> {
        self.check(payload.len())?;
        self.inner.encode(payload, dst)?;
        Ok(())
    }
}

/// Builds one complete frame so header and payload go out in a single write.
pub fn encode_frame(payload: &[u8]) -> LinkResult<Bytes> {
    let mut frame = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    FrameCodec::new(u32::MAX as usize).encode(Bytes::copy_from_slice(payload), &mut frame)?;
    Ok(frame.freeze())
}

/// Message-mode reader yielding whole payloads.
#[derive(Debug)]
pub struct FrameReader<R> {
    frames: FramedRead<R, FrameCodec>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wraps `reader` with the frame limit of `config`.
    pub fn new(reader: R, config: &TcpConfig) -> Self {
        Self {
            frames: FramedRead::new(reader, FrameCodec::from_config(config)),
        }
    }

    /// Waits for the next complete payload.
    ///
    /// Idle deadlines are absorbed here; partial frames stay buffered across them.
    /// Returns [`LinkError::ConnectionClosed`] on EOF, [`LinkError::Interrupted`] on
    /// cancellation and [`LinkError::FrameTooLarge`] for a header over the limit.
    pub async fn next_frame(&mut self, control: &ReadControl<'_>) -> LinkResult<Bytes> {
        loop {
            tokio::select! {
                biased;
                () = control.token.cancelled() => return Err(LinkError::Interrupted),
                next = tokio::time::timeout(control.config.read_deadline, self.frames.next()) => {
                    match next {
                        Err(_elapsed) => {}
                        Ok(Some(frame)) => return frame.map(BytesMut::freeze),
                        Ok(None) => return Err(LinkError::ConnectionClosed),
                    }
                }
            }
        }
    }
}

/// Performs one read bounded by the read deadline.
///
/// Returns `Ok(None)` when the deadline expired without data, `Ok(Some(n))` with
/// `n > 0` on data, [`LinkError::ConnectionClosed`] on EOF and
/// [`LinkError::Interrupted`] on cancellation.
pub async fn read_some<R>(
    reader: &mut R,
    buf: &mut [u8],
    control: &ReadControl<'_>,
) -> LinkResult<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        () = control.token.cancelled() => Err(LinkError::Interrupted),
        result = tokio::time::timeout(control.config.read_deadline, reader.read(buf)) => {
            match result {
                Err(_elapsed) => Ok(None),
                Ok(Ok(0)) => Err(LinkError::ConnectionClosed),
                Ok(Ok(n)) => Ok(Some(n)),
                Ok(Err(e)) => Err(e.into()),
            }
        }
    }
}
