//! WebSocket transport against a loopback relay stand-in

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use iap_transport::{
    ConnectConfig, MessageSink, MessageSource, MessageTransport, TransportError,
    WebSocketTransport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Default, Clone)]
struct SeenRequest {
    uri: String,
    origin: Option<String>,
    protocol: Option<String>,
    authorization: Option<String>,
}

fn header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn config_for(addr: std::net::SocketAddr) -> ConnectConfig {
    ConnectConfig {
        endpoint: format!("ws://{}", addr),
        project: "proj".to_string(),
        zone: "zone-a".to_string(),
        instance: "vm".to_string(),
        port: 22,
        access_token: "tok123".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_handshake_headers_and_binary_exchange() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(SeenRequest::default()));

    let server_seen = seen.clone();
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            *server_seen.lock().unwrap() = SeenRequest {
                uri: req.uri().to_string(),
                origin: header(req, "origin"),
                protocol: header(req, "sec-websocket-protocol"),
                authorization: header(req, "authorization"),
            };
            resp.headers_mut().insert(
                "sec-websocket-protocol",
                HeaderValue::from_static("relay.tunnel.cloudproxy.app"),
            );
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();

        // ConnectSuccessSid "sid", with a text message the client must skip
        ws.send(Message::Text("ignored".to_string())).await.unwrap();
        ws.send(Message::Binary(vec![0, 1, 0, 0, 0, 3, b's', b'i', b'd']))
            .await
            .unwrap();

        let echoed = loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => break data,
                Some(Ok(_)) => continue,
                other => panic!("unexpected: {:?}", other),
            }
        };
        ws.close(None).await.unwrap();
        echoed
    });

    let transport = WebSocketTransport::connect(&config_for(addr)).await.unwrap();
    assert!(transport.connection_id().starts_with("ws-"));
    let (mut sink, mut source) = transport.split();

    let first = source.recv_message().await.unwrap().unwrap();
    assert_eq!(first.as_ref(), &[0, 1, 0, 0, 0, 3, b's', b'i', b'd']);

    sink.send_message(Bytes::from_static(&[0, 7, 0, 0, 0, 0, 0, 0, 0, 3]))
        .await
        .unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), source.recv_message())
        .await
        .unwrap()
        .unwrap();
    assert!(closed.is_none());

    let echoed = server.await.unwrap();
    assert_eq!(echoed, vec![0, 7, 0, 0, 0, 0, 0, 0, 0, 3]);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen.uri,
        "/v4/connect?project=proj&zone=zone-a&instance=vm&interface=nic0&port=22"
    );
    assert_eq!(seen.origin.as_deref(), Some("bot:iap-tunneler"));
    assert_eq!(seen.protocol.as_deref(), Some("relay.tunnel.cloudproxy.app"));
    assert_eq!(seen.authorization.as_deref(), Some("Bearer tok123"));
}

#[tokio::test]
async fn test_close_sends_normal_closure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = |_: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            resp.headers_mut().insert(
                "sec-websocket-protocol",
                HeaderValue::from_static("relay.tunnel.cloudproxy.app"),
            );
            Ok(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
            .await
            .unwrap();
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => frame.map(|frame| frame.code),
            other => panic!("unexpected: {:?}", other),
        }
    });

    let transport = WebSocketTransport::connect(&config_for(addr)).await.unwrap();
    let (mut sink, _source) = transport.split();
    sink.close().await.unwrap();

    // Closing twice is a no-op
    sink.close().await.unwrap();
    assert!(matches!(
        sink.send_message(Bytes::from_static(&[0, 2])).await,
        Err(TransportError::ConnectionClosed)
    ));

    let code = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(CloseCode::Normal));
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WebSocketTransport::connect(&config_for(addr)).await;
    assert!(matches!(
        result,
        Err(TransportError::ConnectionError(_))
    ));
}

#[tokio::test]
async fn test_connect_rejects_invalid_config() {
    let config = ConnectConfig {
        access_token: String::new(),
        ..config_for("127.0.0.1:1".parse().unwrap())
    };

    let result = WebSocketTransport::connect(&config).await;
    assert!(matches!(
        result,
        Err(TransportError::InvalidRequest(_))
    ));
}
