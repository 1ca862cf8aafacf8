//! Backend dialing.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Trait alias for streams that can be proxied.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ProxyStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Source of backend connections for a [`ConnectionPipe`](super::ConnectionPipe).
///
/// One connector is shared by every pipe a server spawns, so implementations
/// must be cheap to call concurrently.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by a successful dial.
    type Stream: ProxyStream;

    /// Open a new backend connection.
    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human readable target used in logs and errors.
    fn target(&self) -> String;
}

/// Connector dialing a fixed TCP host and port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    ///
    /// `host` may be a name or an IP literal; names are resolved on every
    /// dial.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Backend host.
    #[must_use]
    pub fn host(&self) -> &str { &self.host }

    /// Backend port.
    #[must_use]
    pub const fn port(&self) -> u16 { self.port }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn target(&self) -> String { format!("{}:{}", self.host, self.port) }
}
