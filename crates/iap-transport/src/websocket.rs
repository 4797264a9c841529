//! WebSocket transport implementation using tokio-tungstenite

use crate::config::ConnectConfig;
use crate::{MessageSink, MessageSource, MessageTransport, TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use std::borrow::Cow;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, AUTHORIZATION, ORIGIN, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Initialize rustls crypto provider
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("Rustls crypto provider already installed");
        }
    });
}

fn header_value(name: &str, value: &str) -> TransportResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid {} header: {}", name, e)))
}

/// An established relay WebSocket connection
pub struct WebSocketTransport {
    connection_id: String,
    stream: WsStream,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

impl WebSocketTransport {
    /// Open the relay connection described by `config`
    ///
    /// Sends the Origin, subprotocol and bearer-token headers the relay expects.
    pub async fn connect(config: &ConnectConfig) -> TransportResult<Self> {
        config.validate()?;
        ensure_crypto_provider();

        let url = config.url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(ORIGIN, header_value("Origin", &config.origin)?);
        headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            header_value("Sec-WebSocket-Protocol", &config.subprotocol)?,
        );
        headers.insert(
            AUTHORIZATION,
            header_value("Authorization", &format!("Bearer {}", config.access_token))?,
        );

        let connection_id = format!("ws-{}", uuid::Uuid::new_v4());
        debug!(
            conn_id = %connection_id,
            host = url.host_str().unwrap_or_default(),
            instance = %config.instance,
            port = config.port,
            "Connecting to relay"
        );

        let (stream, response) = connect_async(request).await.map_err(|e| {
            error!(conn_id = %connection_id, "WebSocket connect failed: {}", e);
            TransportError::ConnectionError(e.to_string())
        })?;

        info!(
            conn_id = %connection_id,
            status = %response.status(),
            "Relay WebSocket connected"
        );

        Ok(Self {
            connection_id,
            stream,
        })
    }
}

impl MessageTransport for WebSocketTransport {
    type Sink = WebSocketSink;
    type Source = WebSocketSource;

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn split(self) -> (Self::Sink, Self::Source) {
        let (sink, source) = self.stream.split();
        (
            WebSocketSink {
                connection_id: self.connection_id.clone(),
                sink,
                closed: false,
            },
            WebSocketSource {
                connection_id: self.connection_id,
                source,
            },
        )
    }
}

/// Writing half of a [`WebSocketTransport`]
pub struct WebSocketSink {
    connection_id: String,
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send_message(&mut self, message: Bytes) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(conn_id = %self.connection_id, "Sending {} bytes via WebSocket", message.len());

        self.sink
            .send(Message::Binary(message.to_vec()))
            .await
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    TransportError::ConnectionClosed
                }
                other => TransportError::WebSocketError(other.to_string()),
            })
    }

    /// Send a normal-closure close frame, then close the sink
    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        debug!(conn_id = %self.connection_id, "Closing WebSocket connection");

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
        };
        let result = match self.sink.send(Message::Close(Some(frame))).await {
            Ok(()) => self.sink.close().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::WebSocketError(e.to_string())),
        }
    }
}

/// Reading half of a [`WebSocketTransport`]
pub struct WebSocketSource {
    connection_id: String,
    source: SplitStream<WsStream>,
}

#[async_trait]
impl MessageSource for WebSocketSource {
    async fn recv_message(&mut self) -> TransportResult<Option<Bytes>> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Binary(data))) => {
                    trace!(conn_id = %self.connection_id, "Received {} bytes via WebSocket", data.len());
                    return Ok(Some(Bytes::from(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(conn_id = %self.connection_id, "WebSocket closed by remote: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pong replies are queued by tungstenite
                    continue;
                }
                Some(Ok(Message::Text(text))) => {
                    warn!(
                        conn_id = %self.connection_id,
                        "Ignoring text message ({} bytes)",
                        text.len()
                    );
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    debug!(conn_id = %self.connection_id, "WebSocket stream ended");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!(conn_id = %self.connection_id, "WebSocket read error: {}", e);
                    return Err(TransportError::WebSocketError(e.to_string()));
                }
            }
        }
    }
}
