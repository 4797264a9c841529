//! Local TCP listener for the single tunnelled client

use crate::RelayResult;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Default local bind address
pub const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:4000";

/// Listens for the one local client that will be bridged to the relay
#[derive(Debug)]
pub struct LocalListener {
    listener: TcpListener,
}

impl LocalListener {
    pub async fn bind(addr: SocketAddr) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for local client on {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one local client
    pub async fn accept_one(&self) -> RelayResult<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(peer = %peer, "Accepted local client");
        Ok((stream, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accept_one() {
        let listener = LocalListener::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"hi").await.unwrap();
        });

        let (mut stream, peer) = listener.accept_one().await.unwrap();
        assert!(peer.ip().is_loopback());

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        client.await.unwrap();
    }
}
