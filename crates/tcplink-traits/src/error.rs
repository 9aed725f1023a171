//! Link error types.

use std::fmt;

use thiserror::Error;

/// A specialized `Result` type for link operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Represents errors that can occur on a client, a server or a single connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkError {
    /// Dialing the remote endpoint failed or exceeded the connect timeout.
    #[error("unable to dial TCP server {addr}: {reason}")]
    Dial {
        /// The `host:port` that was dialed
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// Binding the listening socket failed.
    #[error("unable to start TCP listening on {addr}: {reason}")]
    Listen {
        /// The address the listener tried to bind
        addr: String,
        /// Underlying failure
        reason: String,
    },

    /// A client already holds a live connection.
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// A server is already accepting connections.
    #[error("server already running on {0}")]
    AlreadyRunning(String),

    /// The operation needs a live connection and there is none.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A blocking multi-step read was abandoned because shutdown was requested.
    #[error("operation interrupted")]
    Interrupted,

    /// Writing to a connection failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A non-timeout I/O error occurred while reading or accepting.
    #[error("IO error: {0}")]
    Io(String),

    /// A frame header announced, or a caller tried to send, a payload above the limit.
    #[error("frame size ({size} bytes) exceeds maximum allowed ({max} bytes)")]
    FrameTooLarge {
        /// The announced or attempted payload size
        size: usize,
        /// The configured limit
        max: usize,
    },

    /// The transport was configured with invalid parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Several per-connection operations failed during one batch operation.
    #[error(transparent)]
    Aggregate(AggregateError),
}

impl LinkError {
    /// Returns `true` when this error ends a read loop as part of a normal shutdown.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<AggregateError> for LinkError {
    fn from(err: AggregateError) -> Self {
        Self::Aggregate(err)
    }
}

/// The combined failures of a batch operation such as `stop` or `broadcast`.
///
/// Each entry pairs the remote address of the failing connection with its error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    context: String,
    failures: Vec<(String, LinkError)>,
}

impl AggregateError {
    /// Creates an empty aggregate with the given context message.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            failures: Vec::new(),
        }
    }

    /// Records the failure of the connection at `address`.
    pub fn push(&mut self, address: impl Into<String>, error: LinkError) {
        self.failures.push((address.into(), error));
    }

    /// All recorded failures in the order they happened.
    pub fn failures(&self) -> &[(String, LinkError)] {
        &self.failures
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns `true` when nothing failed.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as a [`LinkError`].
    pub fn into_result(self) -> LinkResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(LinkError::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} failed)", self.context, self.failures.len())?;
        for (i, (address, error)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{address}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
