//! Transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Timing and sizing knobs shared by clients and servers.
///
/// The read and accept deadlines bound how long a background loop blocks before it
/// re-checks whether it should keep running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Upper bound for a single socket read.
    #[serde(with = "duration_ms")]
    pub read_deadline: Duration,

    /// Upper bound for a single accept call.
    #[serde(with = "duration_ms")]
    pub accept_deadline: Duration,

    /// Maximum time to wait for a dial to complete.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Buffer size for stream-mode reads.
    pub read_buffer_size: usize,

    /// Largest payload accepted or sent in message mode.
    /// `None` = unlimited
    pub max_frame_size: Option<usize>,

    /// Whether to set `TCP_NODELAY` on every socket.
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_deadline: Duration::from_millis(500),
            accept_deadline: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 512,
            max_frame_size: Some(16 * 1024 * 1024), // 16MB
            nodelay: true,
        }
    }
}

impl TcpConfig {
    /// Starts a builder from the default configuration.
    #[must_use]
    pub fn builder() -> TcpConfigBuilder {
        TcpConfigBuilder::default()
    }

    /// Rejects configurations the background loops cannot run with.
    pub fn validate(&self) -> LinkResult<()> {
        if self.read_deadline.is_zero() {
            return Err(LinkError::Configuration(
                "read deadline must be greater than zero".into(),
            ));
        }
        if self.accept_deadline.is_zero() {
            return Err(LinkError::Configuration(
                "accept deadline must be greater than zero".into(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(LinkError::Configuration(
                "connect timeout must be greater than zero".into(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(LinkError::Configuration(
                "read buffer size must be greater than zero".into(),
            ));
        }
        if let Some(max) = self.max_frame_size
            && max > u32::MAX as usize
        {
            return Err(LinkError::Configuration(format!(
                "max frame size {max} does not fit a 4-byte header"
            )));
        }
        Ok(())
    }

    /// The effective payload limit: [`TcpConfig::max_frame_size`] capped at what a
    /// 4-byte header can announce.
    pub fn frame_limit(&self) -> usize {
        self.max_frame_size
            .unwrap_or(u32::MAX as usize)
            .min(u32::MAX as usize)
    }

    /// Checks a payload length against [`TcpConfig::frame_limit`].
    pub fn check_frame_size(&self, size: usize) -> LinkResult<()> {
        let max = self.frame_limit();
        if size > max {
            return Err(LinkError::FrameTooLarge { size, max });
        }
        Ok(())
    }
}

/// Builder for [`TcpConfig`]
#[derive(Debug, Default)]
pub struct TcpConfigBuilder {
    config: TcpConfig,
}

impl TcpConfigBuilder {
    /// Set the read deadline
    #[must_use]
    pub const fn read_deadline(mut self, deadline: Duration) -> Self {
        self.config.read_deadline = deadline;
        self
    }

    /// Set the accept deadline
    #[must_use]
    pub const fn accept_deadline(mut self, deadline: Duration) -> Self {
        self.config.accept_deadline = deadline;
        self
    }

    /// Set both polling deadlines at once
    #[must_use]
    pub const fn deadlines(mut self, deadline: Duration) -> Self {
        self.config.read_deadline = deadline;
        self.config.accept_deadline = deadline;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the stream-mode read buffer size
    #[must_use]
    pub const fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the message-mode payload limit (`None` = unlimited)
    #[must_use]
    pub const fn max_frame_size(mut self, max: Option<usize>) -> Self {
        self.config.max_frame_size = max;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    #[must_use]
    pub const fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TcpConfig {
        self.config
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
