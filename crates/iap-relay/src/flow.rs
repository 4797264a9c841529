//! Byte-count flow accounting
//!
//! Four cumulative counters, each with a single writer:
//!
//! - `bytes_sent_to_transport`: transport writer, once a Data frame is accepted
//! - `bytes_received_from_transport`, `bytes_acked_to_peer`, `bytes_acked_by_peer`:
//!   transport-to-local direction
//!
//! Counters are never reset for the lifetime of a session, reconnects included.

use crate::{RelayError, RelayResult};
use bytes::Bytes;
use iap_proto::build_ack;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Snapshot of the flow counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub bytes_sent_to_transport: u64,
    pub bytes_received_from_transport: u64,
    pub bytes_acked_by_peer: u64,
    pub bytes_acked_to_peer: u64,
}

impl FlowStats {
    /// Bytes sent that the peer has not confirmed yet
    pub fn unacked_by_peer(&self) -> u64 {
        self.bytes_sent_to_transport
            .saturating_sub(self.bytes_acked_by_peer)
    }
}

/// Tracks delivery in both directions and produces acknowledgments
#[derive(Debug, Default)]
pub struct FlowController {
    bytes_sent_to_transport: AtomicU64,
    bytes_received_from_transport: AtomicU64,
    bytes_acked_by_peer: AtomicU64,
    bytes_acked_to_peer: AtomicU64,
}

impl FlowController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a Data frame payload accepted by the transport
    ///
    /// Returns the new cumulative total.
    pub fn on_data_sent(&self, len: usize) -> u64 {
        self.bytes_sent_to_transport
            .fetch_add(len as u64, Ordering::Relaxed)
            + len as u64
    }

    /// Record an inbound Data frame and produce the Ack frame for it
    ///
    /// Every Data frame is acknowledged immediately with the cumulative count.
    pub fn on_data_received(&self, len: usize) -> Bytes {
        let received = self
            .bytes_received_from_transport
            .fetch_add(len as u64, Ordering::Relaxed)
            + len as u64;

        let ack = build_ack(received);
        self.bytes_acked_to_peer.store(received, Ordering::Relaxed);

        trace!(bytes = len, ack = received, "Acknowledging data");
        ack
    }

    /// Record the cumulative count carried by an inbound Ack frame
    ///
    /// A value lower than the last one recorded is a protocol violation.
    pub fn on_peer_ack(&self, acked: u64) -> RelayResult<()> {
        let previous = self.bytes_acked_by_peer.load(Ordering::Relaxed);
        if acked < previous {
            return Err(RelayError::ProtocolRegression {
                previous,
                received: acked,
            });
        }

        self.bytes_acked_by_peer.store(acked, Ordering::Relaxed);
        Ok(())
    }

    pub fn bytes_sent_to_transport(&self) -> u64 {
        self.bytes_sent_to_transport.load(Ordering::Relaxed)
    }

    pub fn bytes_received_from_transport(&self) -> u64 {
        self.bytes_received_from_transport.load(Ordering::Relaxed)
    }

    pub fn bytes_acked_by_peer(&self) -> u64 {
        self.bytes_acked_by_peer.load(Ordering::Relaxed)
    }

    pub fn bytes_acked_to_peer(&self) -> u64 {
        self.bytes_acked_to_peer.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            bytes_sent_to_transport: self.bytes_sent_to_transport(),
            bytes_received_from_transport: self.bytes_received_from_transport(),
            bytes_acked_by_peer: self.bytes_acked_by_peer(),
            bytes_acked_to_peer: self.bytes_acked_to_peer(),
        }
    }
}
