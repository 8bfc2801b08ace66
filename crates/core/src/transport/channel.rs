//! Byte channels to the daemon

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{CoreError, Result};

/// Full-duplex byte stream to the daemon
pub trait DeviceChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> DeviceChannel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedChannel = Box<dyn DeviceChannel>;

/// Opens new channels to the daemon
///
/// Every shell command and every sync session owns one channel exclusively.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn open(&self) -> Result<BoxedChannel>;
}

/// TCP connections to a daemon socket
#[derive(Debug, Clone)]
pub struct TcpChannelProvider {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl TcpChannelProvider {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl ChannelProvider for TcpChannelProvider {
    async fn open(&self) -> Result<BoxedChannel> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| CoreError::timeout(self.connect_timeout))?
            .map_err(|e| CoreError::Connection(format!("cannot connect to daemon at {}: {}", self.addr, e)))?;

        // Interactive shells write tiny stdin packets
        stream.set_nodelay(true)?;

        tracing::debug!("Opened daemon channel to {}", self.addr);
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_provider_opens_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let provider = TcpChannelProvider::new(addr, Duration::from_secs(5));
        let mut channel = provider.open().await.unwrap();
        channel.write_all(b"ping").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_tcp_provider_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let provider = TcpChannelProvider::new(addr, Duration::from_secs(5));
        let err = provider.open().await.err().unwrap();
        assert!(matches!(err, CoreError::Connection(_)));
    }
}
