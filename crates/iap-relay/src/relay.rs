//! Relay loop
//!
//! Runs two directions concurrently over one local stream and one transport:
//!
//! ```text
//!   local --read--> Data frame --------------------------\
//!                                                         > frame queue --> transport writer
//!   transport --recv--> peek tag --> Data: Ack frame ----/
//!                                |          \--> payload --> local write
//!                                |--> ConnectSuccessSid / ReconnectSuccessAck --> Session
//!                                \--> Ack --> FlowController
//! ```
//!
//! The first direction to finish tears down the other; both endpoints are then
//! closed. The writer is never dropped in the middle of a send: when the local
//! side closes it finishes the queue before the transport is closed.

use crate::{FlowController, FlowStats, RelayConfig, RelayResult, Session};
use bytes::Bytes;
use iap_proto::{build_data, Frame, Message};
use iap_transport::{MessageSink, MessageSource, MessageTransport, TransportError};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Why the relay loop stopped without a protocol failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The local client closed its connection or a local read/write failed
    LocalConnectionClosed,
    /// The transport was closed or a transport read/write failed
    TransportClosed,
    /// The shutdown token was cancelled
    ShutdownRequested,
}

/// Final state of a relay loop that shut down in an orderly way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub reason: ShutdownReason,
    pub sid: String,
    pub stats: FlowStats,
    pub reconnect_acks: u64,
}

/// A frame waiting for the transport writer
#[derive(Debug)]
enum Outbound {
    /// Data frame and the number of local bytes it carries
    Data { frame: Bytes, len: usize },
    Ack(Bytes),
}

/// How the transport writer stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Queue closed and fully written
    Drained,
    TransportClosed,
}

/// Bridges a local byte stream and a relay transport
pub struct RelayLoop<L, T> {
    config: RelayConfig,
    local: L,
    transport: T,
    session: Arc<Session>,
    flow: Arc<FlowController>,
    shutdown: CancellationToken,
}

impl<L, T> RelayLoop<L, T>
where
    L: AsyncRead + AsyncWrite + Send + Unpin,
    T: MessageTransport,
{
    pub fn new(config: RelayConfig, local: L, transport: T) -> RelayResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            local,
            transport,
            session: Arc::new(Session::new()),
            flow: Arc::new(FlowController::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Stop the loop when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Shared handle to the session, for observation
    pub fn session(&self) -> Arc<Session> {
        self.session.clone()
    }

    /// Shared handle to the flow counters, for observation
    pub fn flow(&self) -> Arc<FlowController> {
        self.flow.clone()
    }

    /// Run until either endpoint closes, shutdown is requested or a protocol
    /// error occurs
    ///
    /// Both endpoints are closed before this returns, whatever the outcome.
    pub async fn run(self) -> RelayResult<RelayReport> {
        let Self {
            config,
            local,
            transport,
            session,
            flow,
            shutdown,
        } = self;

        let conn_id = transport.connection_id().to_string();
        let (mut sink, mut source) = transport.split();
        let (mut local_read, mut local_write) = tokio::io::split(local);
        let (frame_tx, mut frame_rx) = mpsc::channel::<Outbound>(config.channel_capacity);

        debug!(conn_id = %conn_id, "Relay loop started");

        let outcome = {
            let writer = write_frames(&mut sink, &mut frame_rx, &flow);
            tokio::pin!(writer);
            let mut writer_done = false;

            // Both senders live inside the direction futures and are dropped
            // with them when this select! returns
            let outcome = tokio::select! {
                result = local_to_transport(
                    &mut local_read,
                    frame_tx.clone(),
                    &session,
                    config.buffer_size,
                ) => result,
                result = transport_to_local(
                    &mut source,
                    &mut local_write,
                    frame_tx,
                    &session,
                    &flow,
                ) => result,
                _ = &mut writer => {
                    writer_done = true;
                    Ok(ShutdownReason::TransportClosed)
                }
                _ = shutdown.cancelled() => {
                    info!(conn_id = %conn_id, "Shutdown requested");
                    Ok(ShutdownReason::ShutdownRequested)
                }
            };

            session.close();

            // Frames queued before the local side closed still belong to the peer
            if !writer_done && matches!(outcome, Ok(ShutdownReason::LocalConnectionClosed)) {
                tokio::select! {
                    exit = &mut writer => {
                        if exit == WriterExit::TransportClosed {
                            debug!(conn_id = %conn_id, "Transport closed before queued frames were written");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!(conn_id = %conn_id, "Shutdown requested while writing queued frames");
                    }
                }
            }

            outcome
        };

        if let Err(e) = sink.close().await {
            debug!(conn_id = %conn_id, "Transport close failed: {}", e);
        }

        let mut local = local_read.unsplit(local_write);
        if let Err(e) = local.shutdown().await {
            debug!(conn_id = %conn_id, "Local shutdown failed: {}", e);
        }

        let stats = flow.stats();
        match outcome {
            Ok(reason) => {
                info!(
                    conn_id = %conn_id,
                    sid = %session.current_sid(),
                    ?reason,
                    sent = stats.bytes_sent_to_transport,
                    received = stats.bytes_received_from_transport,
                    unacked = stats.unacked_by_peer(),
                    "Relay loop finished"
                );
                Ok(RelayReport {
                    reason,
                    sid: session.current_sid(),
                    stats,
                    reconnect_acks: session.reconnect_acks(),
                })
            }
            Err(e) => {
                error!(conn_id = %conn_id, sid = %session.current_sid(), "Relay loop failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Local stream -> Data frames
///
/// Data is held back until the session is connected.
async fn local_to_transport<L>(
    local: &mut ReadHalf<L>,
    frames: mpsc::Sender<Outbound>,
    session: &Session,
    buffer_size: usize,
) -> RelayResult<ShutdownReason>
where
    L: AsyncRead + AsyncWrite,
{
    let mut buffer = vec![0u8; buffer_size];

    loop {
        let n = match local.read(&mut buffer).await {
            Ok(0) => {
                debug!("Local connection closed");
                return Ok(ShutdownReason::LocalConnectionClosed);
            }
            Ok(n) => n,
            Err(e) => {
                debug!("Local read failed: {}", e);
                return Ok(ShutdownReason::LocalConnectionClosed);
            }
        };

        if !session.is_connected() {
            trace!("Holding {} bytes until the session is connected", n);
            if !session.wait_connected().await {
                return Ok(ShutdownReason::TransportClosed);
            }
        }

        let frame = build_data(&buffer[..n])?;
        if frames.send(Outbound::Data { frame, len: n }).await.is_err() {
            return Ok(ShutdownReason::TransportClosed);
        }
        trace!(bytes = n, "Queued data frame");
    }
}

/// Transport messages -> session updates, acks and local writes
async fn transport_to_local<S, L>(
    source: &mut S,
    local: &mut WriteHalf<L>,
    frames: mpsc::Sender<Outbound>,
    session: &Session,
    flow: &FlowController,
) -> RelayResult<ShutdownReason>
where
    S: MessageSource,
    L: AsyncRead + AsyncWrite,
{
    loop {
        let bytes = match source.recv_message().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Transport closed");
                return Ok(ShutdownReason::TransportClosed);
            }
            Err(e) => {
                warn!("Transport read failed: {}", e);
                return Ok(ShutdownReason::TransportClosed);
            }
        };

        let message = Frame::new(bytes).decode()?;
        trace!("Received {}", message);

        match message {
            Message::ConnectSuccessSid { sid } => session.on_connect_success_sid(sid),
            Message::ReconnectSuccessAck => session.on_reconnect_success_ack(),
            Message::Data { payload } => {
                let ack = flow.on_data_received(payload.len());
                if frames.send(Outbound::Ack(ack)).await.is_err() {
                    return Ok(ShutdownReason::TransportClosed);
                }

                if let Err(e) = local.write_all(&payload).await {
                    debug!("Local write failed: {}", e);
                    return Ok(ShutdownReason::LocalConnectionClosed);
                }
            }
            Message::Ack { received } => flow.on_peer_ack(received)?,
        }
    }
}

/// Frame queue -> transport, preserving queue order
///
/// Data bytes are counted as sent once the transport has accepted the frame.
/// Any write failure is treated like a closed transport.
async fn write_frames<S>(
    sink: &mut S,
    frames: &mut mpsc::Receiver<Outbound>,
    flow: &FlowController,
) -> WriterExit
where
    S: MessageSink,
{
    while let Some(outbound) = frames.recv().await {
        let (frame, data_len) = match outbound {
            Outbound::Data { frame, len } => (frame, Some(len)),
            Outbound::Ack(frame) => (frame, None),
        };

        match sink.send_message(frame).await {
            Ok(()) => {
                if let Some(len) = data_len {
                    let total = flow.on_data_sent(len);
                    trace!(bytes = len, total, "Wrote data frame");
                }
            }
            Err(TransportError::ConnectionClosed) => {
                debug!("Transport closed while writing");
                return WriterExit::TransportClosed;
            }
            Err(e) => {
                warn!("Transport write failed: {}", e);
                return WriterExit::TransportClosed;
            }
        }
    }

    WriterExit::Drained
}
