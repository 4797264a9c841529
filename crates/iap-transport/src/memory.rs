//! In-process message transport backed by tokio channels

use crate::{MessageSink, MessageSource, MessageTransport, TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// One end of an in-memory transport pair
#[derive(Debug)]
pub struct MemoryTransport {
    connection_id: String,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemoryTransport {
    /// Create two connected ends; messages sent on one arrive on the other
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);

        (
            Self {
                connection_id: "mem-a".to_string(),
                tx: a_tx,
                rx: a_rx,
            },
            Self {
                connection_id: "mem-b".to_string(),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }
}

impl MessageTransport for MemoryTransport {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn split(self) -> (Self::Sink, Self::Source) {
        (MemorySink { tx: Some(self.tx) }, MemorySource { rx: self.rx })
    }
}

/// Sending half of a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send_message(&mut self, message: Bytes) -> TransportResult<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> TransportResult<()> {
        // Dropping the sender ends the peer's receive stream
        self.tx = None;
        Ok(())
    }
}

/// Receiving half of a [`MemoryTransport`]
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv_message(&mut self) -> TransportResult<Option<Bytes>> {
        Ok(self.rx.recv().await)
    }
}
