//! Link metrics types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a client's or server's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetrics {
    /// Total number of bytes written, headers included.
    pub bytes_sent: u64,

    /// Total number of bytes read, headers included.
    pub bytes_received: u64,

    /// Total number of payloads sent (one per send or per broadcast recipient).
    pub messages_sent: u64,

    /// Total number of units delivered to the receive handler.
    pub messages_received: u64,

    /// Total number of established connections (dials or accepts).
    pub connections: u64,

    /// Total number of failed dials, accepts or sends.
    pub failed_connections: u64,

    /// Connections currently live.
    pub active_connections: u64,
}

/// Lock-free counters updated from the read loops and the caller's context.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// Total bytes sent (atomic counter).
    pub bytes_sent: AtomicU64,

    /// Total bytes received (atomic counter).
    pub bytes_received: AtomicU64,

    /// Total messages sent (atomic counter).
    pub messages_sent: AtomicU64,

    /// Total messages received (atomic counter).
    pub messages_received: AtomicU64,

    /// Total established connections (atomic counter).
    pub connections: AtomicU64,

    /// Failed operations (atomic counter).
    pub failed_connections: AtomicU64,

    /// Current active connections (atomic gauge).
    pub active_connections: AtomicU64,
}

impl AtomicMetrics {
    /// Creates a new `AtomicMetrics` instance with all counters initialized to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one outgoing payload of `bytes` bytes on the wire.
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records one delivered unit of `bytes` bytes on the wire.
    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Records a newly established connection.
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection going away. Saturates at zero.
    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Records a failed dial, accept or send.
    pub fn record_failure(&self) {
        self.failed_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Creates a serializable `LinkMetrics` snapshot from the current atomic values.
    pub fn snapshot(&self) -> LinkMetrics {
        LinkMetrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}
