//! Core link types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Width of the big-endian length header that prefixes every message-mode frame.
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// How payloads are delimited on the wire.
///
/// The mode is fixed when a client or server is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Raw byte stream; the receiver sees arbitrary chunk boundaries.
    #[default]
    Stream,
    /// Length-prefixed frames; the receiver sees exactly the payloads that were sent.
    Message,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Message => write!(f, "message"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" => Ok(Self::Stream),
            "message" => Ok(Self::Message),
            other => Err(LinkError::Configuration(format!(
                "unknown connection mode '{other}' (expected 'stream' or 'message')"
            ))),
        }
    }
}
