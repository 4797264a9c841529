//! Message transport for the relay subprotocol
//!
//! The relay engine only needs a duplex channel of binary messages, one frame
//! per message. This crate defines that contract and provides two
//! implementations:
//!
//! - [`WebSocketTransport`]: the authenticated `wss://` connection to the relay
//! - [`memory::MemoryTransport`]: an in-process pair, used for tests and local wiring
//!
//! Transports are split into a [`MessageSink`] and a [`MessageSource`] so that
//! reading and writing can proceed concurrently.

pub mod config;
pub mod memory;
pub mod websocket;

pub use config::ConnectConfig;
pub use memory::MemoryTransport;
pub use websocket::{WebSocketSink, WebSocketSource, WebSocketTransport};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Invalid connect request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Sending half of a message transport
#[async_trait]
pub trait MessageSink: Send {
    /// Send one binary message
    async fn send_message(&mut self, message: Bytes) -> TransportResult<()>;

    /// Close the transport gracefully
    async fn close(&mut self) -> TransportResult<()>;
}

/// Receiving half of a message transport
#[async_trait]
pub trait MessageSource: Send {
    /// Receive one complete binary message
    ///
    /// Returns `None` once the peer has closed the transport.
    async fn recv_message(&mut self) -> TransportResult<Option<Bytes>>;
}

/// A duplex, message-oriented transport
pub trait MessageTransport: Send {
    type Sink: MessageSink + 'static;
    type Source: MessageSource + 'static;

    /// Identifier used to correlate log lines for this connection
    fn connection_id(&self) -> &str;

    /// Split into independently usable halves
    fn split(self) -> (Self::Sink, Self::Source);
}
